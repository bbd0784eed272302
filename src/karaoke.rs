//! Karaoke timing engine.
//!
//! Given an ordered sequence of word timestamps and a playback clock,
//! computes which word is "current" in real time. Timestamps may arrive
//! incrementally while audio is already playing (streamed synthesis), so the
//! evaluator always re-reads the shared state on every tick — it never works
//! from a snapshot captured when the timer started.
//!
//! The epoch is offset by `audio_latency_ms`: hardware and buffering delay
//! mean the on-screen highlight must lag the nominal synthesis timestamps to
//! match what the listener actually hears.

use crate::config::KaraokeConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One word's span within an utterance, in seconds from utterance start.
/// `start`/`end` are monotonically non-decreasing across a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug)]
struct TimingState {
    epoch: Option<Instant>,
    timestamps: Vec<WordTimestamp>,
    current_index: i32,
    tracking: bool,
}

impl TimingState {
    fn inactive() -> Self {
        Self {
            epoch: None,
            timestamps: Vec::new(),
            current_index: -1,
            tracking: false,
        }
    }

    fn reset(&mut self) {
        self.epoch = None;
        self.timestamps.clear();
        self.current_index = -1;
        self.tracking = false;
    }
}

/// Re-evaluate the current word for `now`. Returns false when tracking has
/// ended (auto-stop) and the ticker should exit.
fn evaluate(state: &mut TimingState, now: Instant, trailing_stop: f64) -> bool {
    if !state.tracking {
        return false;
    }
    let epoch = match state.epoch {
        Some(epoch) => epoch,
        None => return false,
    };
    let elapsed = if now >= epoch {
        (now - epoch).as_secs_f64()
    } else {
        -((epoch - now).as_secs_f64())
    };

    // Inside the latency-compensation window the first word holds.
    if elapsed < 0.0 {
        state.current_index = 0;
        return true;
    }

    // Audio can start before the first timestamp batch arrives.
    if state.timestamps.is_empty() {
        state.current_index = 0;
        return true;
    }

    let last_end = state.timestamps[state.timestamps.len() - 1].end;
    if elapsed > last_end + trailing_stop {
        // Terminal transition, not user-initiated.
        state.reset();
        return false;
    }

    // Last word whose start has passed: a word stays highlighted through the
    // gap after it ends until the next word begins (no flicker to none).
    let mut index = 0i32;
    for (i, ts) in state.timestamps.iter().enumerate() {
        if elapsed >= ts.start {
            index = i as i32;
        } else {
            break;
        }
    }
    state.current_index = index;
    true
}

pub struct KaraokeEngine {
    config: KaraokeConfig,
    state: Arc<Mutex<TimingState>>,
    ticker: Mutex<Option<CancellationToken>>,
}

impl KaraokeEngine {
    pub fn new(config: KaraokeConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TimingState::inactive())),
            ticker: Mutex::new(None),
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.config.audio_latency_ms)
    }

    /// Begin tracking a complete timestamp sequence: resets the epoch,
    /// replaces the sequence wholesale and highlights the first word.
    pub fn start_tracking(&self, timestamps: Vec<WordTimestamp>) {
        {
            let mut state = self.state.lock().unwrap();
            state.epoch = Some(Instant::now() + self.latency());
            state.timestamps = timestamps;
            state.current_index = 0;
            state.tracking = true;
        }
        self.respawn_ticker();
    }

    /// Begin the timer epoch without any timestamps yet (audio starting
    /// before the first batch arrives). Idempotent: calling while tracking
    /// must not reset an in-progress timer.
    pub fn start_timer(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.tracking {
                return;
            }
            state.epoch = Some(Instant::now() + self.latency());
            state.timestamps.clear();
            state.current_index = 0;
            state.tracking = true;
        }
        self.respawn_ticker();
    }

    /// Append streamed timestamps without touching the epoch or the current
    /// index. Every call lands in the shared sequence before the next
    /// evaluator tick reads it, so batches queued in the same tick all apply.
    pub fn add_timestamps(&self, more: Vec<WordTimestamp>) {
        let mut state = self.state.lock().unwrap();
        state.timestamps.extend(more);
    }

    /// Cancel the evaluator and clear all tracking state.
    pub fn stop_tracking(&self) {
        if let Some(token) = self.ticker.lock().unwrap().take() {
            token.cancel();
        }
        self.state.lock().unwrap().reset();
    }

    /// Current word index; -1 when inactive.
    pub fn current_word_index(&self) -> i32 {
        self.state.lock().unwrap().current_index
    }

    pub fn is_tracking(&self) -> bool {
        self.state.lock().unwrap().tracking
    }

    pub fn timestamp_count(&self) -> usize {
        self.state.lock().unwrap().timestamps.len()
    }

    fn respawn_ticker(&self) {
        let mut guard = self.ticker.lock().unwrap();
        if let Some(old) = guard.take() {
            old.cancel();
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let state = self.state.clone();
        let tick = Duration::from_millis(self.config.tick_ms);
        let trailing_stop = self.config.trailing_stop_ms as f64 / 1000.0;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        // Lock and re-read the live state every tick; never
                        // a sequence captured at spawn time.
                        let keep_going = {
                            let mut state = state.lock().unwrap();
                            evaluate(&mut state, Instant::now(), trailing_stop)
                        };
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
        });
        *guard = Some(token);
    }
}

impl Drop for KaraokeEngine {
    fn drop(&mut self) {
        if let Some(token) = self.ticker.lock().unwrap().take() {
            token.cancel();
        }
    }
}
