//! Word-level TTS orchestrator.
//!
//! A tapped word goes through: cancel any pending word synthesis, check the
//! composite-key cache, resolve homograph pronunciation on a miss, then
//! synthesize via the streaming backend, play the framed result and write it
//! back into the word cache. At most one word synthesis is ever in flight.

use crate::audio::{create_wav_from_pcm, pcm_duration_ms};
use crate::cache::word::{SentenceType, WordCacheKey, WordPosition, WordTtsCache};
use crate::config::AudioFormatConfig;
use crate::error::{CoreError, CoreResult};
use crate::pronounce::{is_homograph, HomographResolver, Pronunciation};
use crate::speech::{
    AudioSink, CaptureBuffer, PlaybackRouter, SpeechSynthesizer, SynthesisEvent, SynthesisRequest,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Prosody hint derived from the sentence mood and passed to synthesis.
/// Presentation-only; never correctness-critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Neutral,
    Curious,
    Excited,
}

impl Emotion {
    pub fn from_sentence_type(sentence_type: SentenceType) -> Self {
        match sentence_type {
            SentenceType::Question => Self::Curious,
            SentenceType::Exclamation => Self::Excited,
            SentenceType::Statement => Self::Neutral,
        }
    }

    fn tag_name(self) -> Option<&'static str> {
        match self {
            Self::Neutral => None,
            Self::Curious => Some("curious"),
            Self::Excited => Some("excited"),
        }
    }
}

/// The tapped word's surroundings, as the reader screen knows them.
#[derive(Debug, Clone)]
pub struct WordContext {
    pub sentence: String,
    pub word_index_in_sentence: usize,
    pub position: WordPosition,
    pub punctuation: Option<String>,
    pub sentence_type: SentenceType,
}

#[derive(Debug, Clone)]
pub struct WordPlayback {
    pub from_cache: bool,
    pub duration_ms: u64,
    pub pronunciation_index: Option<u32>,
}

struct OrchestratorState {
    loading_word_index: i32,
    in_flight: Option<CancellationToken>,
    generation: u64,
}

pub struct WordTtsOrchestrator {
    synth: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    resolver: Arc<dyn HomographResolver>,
    cache: Arc<WordTtsCache>,
    format: AudioFormatConfig,
    router: PlaybackRouter,
    capture: CaptureBuffer,
    state: Mutex<OrchestratorState>,
}

impl WordTtsOrchestrator {
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        resolver: Arc<dyn HomographResolver>,
        cache: Arc<WordTtsCache>,
        format: AudioFormatConfig,
    ) -> Self {
        Self {
            synth,
            sink,
            resolver,
            cache,
            format,
            router: PlaybackRouter::new(),
            capture: CaptureBuffer::new(),
            state: Mutex::new(OrchestratorState {
                loading_word_index: -1,
                in_flight: None,
                generation: 0,
            }),
        }
    }

    /// Index of the word currently being resolved/synthesized; -1 when idle.
    pub fn loading_word_index(&self) -> i32 {
        self.state.lock().unwrap().loading_word_index
    }

    /// Play one tapped word. Cancels any pending word synthesis first (its
    /// caller sees `CoreError::Cancelled`), then resolves through cache,
    /// disambiguation and synthesis as needed.
    pub async fn play_word(
        &self,
        word: &str,
        word_index: i32,
        ctx: &WordContext,
    ) -> CoreResult<WordPlayback> {
        // Cancel-then-start: the pending request's token flips first, and
        // playback is stopped before the new synthesis is issued so two
        // audio streams never overlap.
        let previous = self.state.lock().unwrap().in_flight.take();
        if let Some(token) = previous {
            token.cancel();
            self.sink.stop().await?;
        }

        let token = CancellationToken::new();
        let my_generation = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.loading_word_index = word_index;
            state.in_flight = Some(token.clone());
            state.generation
        };

        let result = self.play_word_inner(word, ctx, &token).await;

        // Clear transitional state only if a newer request hasn't already
        // taken over.
        {
            let mut state = self.state.lock().unwrap();
            if state.generation == my_generation {
                state.loading_word_index = -1;
                state.in_flight = None;
            }
        }

        result
    }

    async fn play_word_inner(
        &self,
        word: &str,
        ctx: &WordContext,
        token: &CancellationToken,
    ) -> CoreResult<WordPlayback> {
        let emotion = Emotion::from_sentence_type(ctx.sentence_type);

        let base_key = WordCacheKey::new(
            word,
            ctx.position,
            ctx.punctuation.as_deref(),
            ctx.sentence_type,
            None,
        );
        if let Some(playback) = self.try_play_cached(&base_key).await? {
            return Ok(playback);
        }

        // Cache miss. Homographs need the sentence to pick a pronunciation;
        // a failed resolution degrades to index 0 instead of failing the tap.
        let pronunciation = if is_homograph(word) {
            let resolved = tokio::select! {
                _ = token.cancelled() => return Err(CoreError::Cancelled),
                resolved = self.resolver.resolve(word, &ctx.sentence, ctx.word_index_in_sentence) => resolved,
            };
            match resolved {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!(
                        "Homograph disambiguation failed for '{}', falling back to default pronunciation: {}",
                        word,
                        e
                    );
                    Some(Pronunciation::default_pronunciation())
                }
            }
        } else {
            None
        };

        let key = match &pronunciation {
            Some(p) => WordCacheKey::new(
                word,
                ctx.position,
                ctx.punctuation.as_deref(),
                ctx.sentence_type,
                Some(p.pronunciation_index),
            ),
            None => base_key,
        };

        // Homograph entries are cached under their resolved index, so the
        // indexed key gets its own lookup before synthesis.
        if pronunciation.is_some() {
            if let Some(playback) = self.try_play_cached(&key).await? {
                return Ok(playback);
            }
        }

        let text = build_synthesis_text(word, pronunciation.as_ref(), emotion);
        let pcm = self.synthesize_collecting(text, token).await?;

        let duration_ms = pcm_duration_ms(
            pcm.len(),
            self.format.sample_rate,
            self.format.bits_per_sample,
            self.format.channels,
        );
        let wav = create_wav_from_pcm(
            &pcm,
            self.format.sample_rate,
            self.format.bits_per_sample,
            self.format.channels,
        );
        self.sink.play(wav).await?;
        self.cache.set(&key, &pcm, duration_ms).await?;

        Ok(WordPlayback {
            from_cache: false,
            duration_ms,
            pronunciation_index: pronunciation.map(|p| p.pronunciation_index),
        })
    }

    /// Run one streamed synthesis to completion, accumulating decoded
    /// chunks, honoring cancellation at every suspension point.
    async fn synthesize_collecting(
        &self,
        text: String,
        token: &CancellationToken,
    ) -> CoreResult<Vec<u8>> {
        let context_id = Uuid::new_v4();
        self.router.register(context_id);
        let mut rx = self.synth.synthesize(SynthesisRequest { context_id, text });

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    self.router.forget(context_id);
                    self.capture.discard(context_id);
                    let _ = self.sink.stop().await;
                    return Err(CoreError::Cancelled);
                }
                event = rx.recv() => event,
            };
            match event {
                Some(SynthesisEvent::AudioChunk(chunk)) => self.capture.push(context_id, chunk),
                // Single words carry no karaoke sequence worth tracking
                Some(SynthesisEvent::Timestamps(_)) => {}
                Some(SynthesisEvent::Done) => break,
                Some(SynthesisEvent::Error(msg)) => {
                    self.router.forget(context_id);
                    self.capture.discard(context_id);
                    return Err(CoreError::Synthesis(msg));
                }
                None => {
                    self.router.forget(context_id);
                    self.capture.discard(context_id);
                    return Err(CoreError::Synthesis(
                        "Synthesis stream closed before done signal".to_string(),
                    ));
                }
            }
        }

        self.capture.finalize(context_id)
    }

    async fn try_play_cached(&self, key: &WordCacheKey) -> CoreResult<Option<WordPlayback>> {
        let entry = match self.cache.get(key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        // Index/filesystem drift falls through to the synthesis path
        let pcm = match self.cache.read_audio(&entry).await? {
            Some(pcm) => pcm,
            None => return Ok(None),
        };
        let wav = create_wav_from_pcm(
            &pcm,
            self.format.sample_rate,
            self.format.bits_per_sample,
            self.format.channels,
        );
        self.sink.play(wav).await?;
        Ok(Some(WordPlayback {
            from_cache: true,
            duration_ms: entry.duration_ms,
            pronunciation_index: key.pronunciation_index,
        }))
    }

    /// Cancel any in-flight synthesis and stop playback. Idempotent: safe
    /// to call when nothing is pending.
    pub async fn stop(&self) -> CoreResult<()> {
        let token = {
            let mut state = self.state.lock().unwrap();
            state.loading_word_index = -1;
            state.in_flight.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.sink.stop().await
    }
}

/// Wrap the word in phoneme markup when a pronunciation was resolved, and in
/// an emotion tag when the sentence mood is non-neutral.
fn build_synthesis_text(
    word: &str,
    pronunciation: Option<&Pronunciation>,
    emotion: Emotion,
) -> String {
    let mut text = match pronunciation {
        Some(p) if !p.phonemes.is_empty() => {
            format!("<phoneme ph=\"{}\">{}</phoneme>", p.phonemes, word)
        }
        _ => word.to_string(),
    };
    if let Some(tag) = emotion.tag_name() {
        text = format!("<emotion name=\"{}\">{}</emotion>", tag, text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bytes_to_base64;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Backend that answers every request immediately with two chunks.
    struct InstantSynth {
        pcm: Vec<u8>,
        calls: AtomicUsize,
    }

    impl InstantSynth {
        fn new(pcm: Vec<u8>) -> Self {
            Self {
                pcm,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SpeechSynthesizer for InstantSynth {
        fn synthesize(&self, _request: SynthesisRequest) -> mpsc::Receiver<SynthesisEvent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            let mid = self.pcm.len() / 2;
            tx.try_send(SynthesisEvent::AudioChunk(bytes_to_base64(&self.pcm[..mid])))
                .unwrap();
            tx.try_send(SynthesisEvent::AudioChunk(bytes_to_base64(&self.pcm[mid..])))
                .unwrap();
            tx.try_send(SynthesisEvent::Done).unwrap();
            rx
        }
    }

    /// Backend that never completes; requests hang until cancelled.
    #[derive(Default)]
    struct StallSynth {
        held: Mutex<Vec<mpsc::Sender<SynthesisEvent>>>,
    }

    impl SpeechSynthesizer for StallSynth {
        fn synthesize(&self, _request: SynthesisRequest) -> mpsc::Receiver<SynthesisEvent> {
            let (tx, rx) = mpsc::channel(8);
            self.held.lock().unwrap().push(tx);
            rx
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        plays: Mutex<Vec<Vec<u8>>>,
        stops: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, wav: Vec<u8>) -> CoreResult<()> {
            self.plays.lock().unwrap().push(wav);
            Ok(())
        }

        async fn stop(&self) -> CoreResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedResolver {
        index: Option<u32>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl HomographResolver for FixedResolver {
        async fn resolve(
            &self,
            _word: &str,
            _sentence: &str,
            _word_index: usize,
        ) -> CoreResult<Pronunciation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.index {
                Some(index) => Ok(Pronunciation {
                    pronunciation_index: index,
                    phonemes: "rEd".to_string(),
                }),
                None => Err(CoreError::Network("disambiguation offline".to_string())),
            }
        }
    }

    fn word_cache(dir: &std::path::Path) -> Arc<WordTtsCache> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Arc::new(WordTtsCache::new(store, dir.to_path_buf(), 7))
    }

    fn statement_ctx() -> WordContext {
        WordContext {
            sentence: "The dragon flew away".to_string(),
            word_index_in_sentence: 1,
            position: WordPosition::Mid,
            punctuation: None,
            sentence_type: SentenceType::Statement,
        }
    }

    fn build(
        synth: Arc<dyn SpeechSynthesizer>,
        resolver: Arc<dyn HomographResolver>,
        dir: &std::path::Path,
    ) -> (Arc<WordTtsOrchestrator>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(WordTtsOrchestrator::new(
            synth,
            sink.clone(),
            resolver,
            word_cache(dir),
            AudioFormatConfig::default(),
        ));
        (orchestrator, sink)
    }

    #[test]
    fn emotion_mapping() {
        assert_eq!(
            Emotion::from_sentence_type(SentenceType::Question),
            Emotion::Curious
        );
        assert_eq!(
            Emotion::from_sentence_type(SentenceType::Exclamation),
            Emotion::Excited
        );
        assert_eq!(
            Emotion::from_sentence_type(SentenceType::Statement),
            Emotion::Neutral
        );
    }

    #[test]
    fn synthesis_text_markup() {
        let p = Pronunciation {
            pronunciation_index: 1,
            phonemes: "rEd".to_string(),
        };
        assert_eq!(build_synthesis_text("dragon", None, Emotion::Neutral), "dragon");
        assert_eq!(
            build_synthesis_text("dragon", None, Emotion::Curious),
            "<emotion name=\"curious\">dragon</emotion>"
        );
        assert_eq!(
            build_synthesis_text("read", Some(&p), Emotion::Neutral),
            "<phoneme ph=\"rEd\">read</phoneme>"
        );
        assert_eq!(
            build_synthesis_text("read", Some(&p), Emotion::Excited),
            "<emotion name=\"excited\"><phoneme ph=\"rEd\">read</phoneme></emotion>"
        );
    }

    #[tokio::test]
    async fn miss_synthesizes_then_hit_skips_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let synth = Arc::new(InstantSynth::new(vec![1, 2, 3, 4, 5, 6]));
        let resolver = Arc::new(FixedResolver {
            index: Some(0),
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, sink) = build(synth.clone(), resolver, dir.path());

        let first = orchestrator
            .play_word("dragon", 3, &statement_ctx())
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.plays.lock().unwrap().len(), 1);
        // Played audio is the framed PCM
        assert_eq!(&sink.plays.lock().unwrap()[0][44..], &[1, 2, 3, 4, 5, 6]);

        let second = orchestrator
            .play_word("dragon", 3, &statement_ctx())
            .await
            .unwrap();
        assert!(second.from_cache);
        // No second network call on the hit
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.loading_word_index(), -1);
    }

    #[tokio::test]
    async fn homograph_resolution_feeds_cache_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let synth = Arc::new(InstantSynth::new(vec![7, 7, 7, 7]));
        let resolver = Arc::new(FixedResolver {
            index: Some(1),
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, _sink) = build(synth.clone(), resolver.clone(), dir.path());

        let first = orchestrator
            .play_word("read", 0, &statement_ctx())
            .await
            .unwrap();
        assert_eq!(first.pronunciation_index, Some(1));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        // Second tap re-resolves but finds the indexed entry — no synthesis
        let second = orchestrator
            .play_word("read", 0, &statement_ctx())
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disambiguation_failure_degrades_to_default_pronunciation() {
        let dir = tempfile::TempDir::new().unwrap();
        let synth = Arc::new(InstantSynth::new(vec![1, 2]));
        let resolver = Arc::new(FixedResolver {
            index: None,
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, sink) = build(synth, resolver, dir.path());

        let playback = orchestrator
            .play_word("tear", 5, &statement_ctx())
            .await
            .unwrap();
        // Mispronunciation beats silence: still plays, at index 0
        assert_eq!(playback.pronunciation_index, Some(0));
        assert_eq!(sink.plays.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_tap_cancels_pending_synthesis() {
        let dir = tempfile::TempDir::new().unwrap();
        let stall = Arc::new(StallSynth::default());
        let resolver = Arc::new(FixedResolver {
            index: Some(0),
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(WordTtsOrchestrator::new(
            stall.clone(),
            sink.clone(),
            resolver,
            word_cache(dir.path()),
            AudioFormatConfig::default(),
        ));

        let first = {
            let orchestrator = orchestrator.clone();
            let ctx = statement_ctx();
            tokio::spawn(async move { orchestrator.play_word("dragon", 2, &ctx).await })
        };
        // Let the first request reach its stalled stream
        tokio::task::yield_now().await;
        assert_eq!(orchestrator.loading_word_index(), 2);

        // New tap: the pending request must reject with the cancellation
        // marker, not resolve and not report failure
        let second = {
            let orchestrator = orchestrator.clone();
            let ctx = statement_ctx();
            tokio::spawn(async move { orchestrator.play_word("flew", 4, &ctx).await })
        };

        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Err(CoreError::Cancelled)));

        // The second request is now the pending one
        tokio::task::yield_now().await;
        assert_eq!(orchestrator.loading_word_index(), 4);

        orchestrator.stop().await.unwrap();
        let second_result = second.await.unwrap();
        assert!(matches!(second_result, Err(CoreError::Cancelled)));
        assert_eq!(orchestrator.loading_word_index(), -1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_idle() {
        let dir = tempfile::TempDir::new().unwrap();
        let synth = Arc::new(InstantSynth::new(vec![1, 2]));
        let resolver = Arc::new(FixedResolver {
            index: Some(0),
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, sink) = build(synth, resolver, dir.path());

        orchestrator.stop().await.unwrap();
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.loading_word_index(), -1);
        assert_eq!(sink.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backend_error_surfaces_and_clears_state() {
        struct FailingSynth;
        impl SpeechSynthesizer for FailingSynth {
            fn synthesize(&self, _request: SynthesisRequest) -> mpsc::Receiver<SynthesisEvent> {
                let (tx, rx) = mpsc::channel(2);
                tx.try_send(SynthesisEvent::Error("voice model unavailable".to_string()))
                    .unwrap();
                rx
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let resolver = Arc::new(FixedResolver {
            index: Some(0),
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, _sink) = build(Arc::new(FailingSynth), resolver, dir.path());

        let result = orchestrator.play_word("dragon", 1, &statement_ctx()).await;
        match result {
            Err(CoreError::Synthesis(msg)) => assert!(msg.contains("voice model")),
            other => panic!("expected synthesis error, got {:?}", other.map(|_| ())),
        }
        // Never left stuck in a transitional value
        assert_eq!(orchestrator.loading_word_index(), -1);
    }
}
