//! Raw audio plumbing: base64 transport codec and RIFF/WAVE framing.
//!
//! Base64 is only the transport encoding between the network/storage layers
//! and binary memory. Chunked synthesis audio must be decoded first and the
//! raw bytes joined — concatenating base64 text segments produces garbage
//! because of padding.

use crate::error::{CoreError, CoreResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Decode a base64 transport string into raw bytes.
pub fn base64_to_bytes(encoded: &str) -> CoreResult<Vec<u8>> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| CoreError::Other(format!("Invalid base64 audio payload: {}", e)))
}

/// Encode raw bytes for transport.
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a sequence of base64 chunks and join the raw bytes in order.
pub fn concat_base64_chunks(chunks: &[String]) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(&base64_to_bytes(chunk)?);
    }
    Ok(out)
}

/// Wrap raw little-endian PCM samples in a standard 44-byte RIFF/WAVE header
/// so the platform audio player can decode them.
pub fn create_wav_from_pcm(
    pcm: &[u8],
    sample_rate: u32,
    bits_per_sample: u16,
    channels: u16,
) -> Vec<u8> {
    let data_size = pcm.len() as u32;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(44 + pcm.len());

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

/// Duration of a raw PCM buffer in milliseconds.
///
/// Used to fill `duration_ms` on cache entries when the synthesis backend
/// does not report one.
pub fn pcm_duration_ms(byte_len: usize, sample_rate: u32, bits_per_sample: u16, channels: u16) -> u64 {
    let bytes_per_sample = (bits_per_sample / 8) as u64 * channels as u64;
    if bytes_per_sample == 0 || sample_rate == 0 {
        return 0;
    }
    let samples = byte_len as u64 / bytes_per_sample;
    samples * 1_000 / sample_rate as u64
}
