//! Streaming speech-synthesis and playback ports.
//!
//! The synthesis backend holds a persistent connection and streams audio
//! chunks plus word timestamps for each request, keyed by a caller-supplied
//! context id. The core consumes those streams through an event channel per
//! request, accumulates decoded chunks in a [`CaptureBuffer`], and plays the
//! framed result through an [`AudioSink`].

use crate::audio::concat_base64_chunks;
use crate::error::{CoreError, CoreResult};
use crate::karaoke::WordTimestamp;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One synthesis request. `text` may carry phoneme/emotion markup.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub context_id: Uuid,
    pub text: String,
}

/// Events streamed back for one request, in arrival order.
#[derive(Debug, Clone)]
pub enum SynthesisEvent {
    /// Base64 transport encoding of a raw PCM chunk.
    AudioChunk(String),
    /// Word timestamps; may arrive in several batches mid-stream.
    Timestamps(Vec<WordTimestamp>),
    Done,
    Error(String),
}

/// Port over the streaming synthesis backend. `synthesize` returns
/// immediately; events arrive on the channel until `Done` or `Error`.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, request: SynthesisRequest) -> mpsc::Receiver<SynthesisEvent>;
}

/// Port over the platform audio player.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a complete WAV buffer.
    async fn play(&self, wav: Vec<u8>) -> CoreResult<()>;
    /// Stop current playback; a no-op when nothing is playing.
    async fn stop(&self) -> CoreResult<()>;
}

/// Matches untagged "playback started" signals from the platform player to
/// pending requests in arrival order.
///
/// The player does not echo our context id back, so the oldest pending id is
/// assumed to be the one that started. Concurrent overlapping requests can in
/// principle be matched out of order; accepted limitation of the player API.
#[derive(Default)]
pub struct PlaybackRouter {
    pending: Mutex<VecDeque<Uuid>>,
}

impl PlaybackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context_id: Uuid) {
        self.pending.lock().unwrap().push_back(context_id);
    }

    /// An untagged started-signal arrived: resolve it to the oldest pending
    /// request, if any.
    pub fn on_playback_started(&self) -> Option<Uuid> {
        self.pending.lock().unwrap().pop_front()
    }

    /// Forget a request that was cancelled before its playback started.
    pub fn forget(&self, context_id: Uuid) {
        self.pending.lock().unwrap().retain(|id| *id != context_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Accumulates streamed base64 audio chunks per context id until the stream
/// finishes, then yields the joined raw bytes.
#[derive(Default)]
pub struct CaptureBuffer {
    chunks: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, context_id: Uuid, chunk: String) {
        self.chunks
            .lock()
            .unwrap()
            .entry(context_id)
            .or_default()
            .push(chunk);
    }

    /// Decode every accumulated chunk for this context and join the raw
    /// bytes in arrival order. The context's buffer is consumed.
    pub fn finalize(&self, context_id: Uuid) -> CoreResult<Vec<u8>> {
        let chunks = self
            .chunks
            .lock()
            .unwrap()
            .remove(&context_id)
            .ok_or_else(|| {
                CoreError::Synthesis(format!("No audio captured for context {}", context_id))
            })?;
        concat_base64_chunks(&chunks)
    }

    /// Drop a cancelled or failed context's chunks.
    pub fn discard(&self, context_id: Uuid) {
        self.chunks.lock().unwrap().remove(&context_id);
    }
}
