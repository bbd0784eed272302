//! Homograph disambiguation client.
//!
//! "read", "live", "tear" and friends need the sentence to know how they
//! sound. The backend runs an LLM over the word, its sentence and its index
//! in that sentence, and answers with a pronunciation index plus a phoneme
//! string for synthesis markup. Callers degrade to pronunciation index 0
//! when this service fails — a mispronounced word beats silence.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Words with one spelling and several pronunciations. Surface check only;
/// which pronunciation applies is the service's call.
const HOMOGRAPHS: &[&str] = &[
    "bass", "bow", "close", "desert", "dove", "lead", "live", "minute",
    "object", "present", "produce", "read", "record", "refuse", "subject",
    "tear", "wind", "wound",
];

pub fn is_homograph(word: &str) -> bool {
    let normalized = word.to_lowercase();
    HOMOGRAPHS.contains(&normalized.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pronunciation {
    pub pronunciation_index: u32,
    pub phonemes: String,
}

impl Pronunciation {
    /// The degraded fallback when disambiguation fails.
    pub fn default_pronunciation() -> Self {
        Self {
            pronunciation_index: 0,
            phonemes: String::new(),
        }
    }
}

/// Port over the disambiguation service.
#[async_trait]
pub trait HomographResolver: Send + Sync {
    async fn resolve(
        &self,
        word: &str,
        sentence: &str,
        word_index: usize,
    ) -> CoreResult<Pronunciation>;
}

#[derive(Debug, Serialize)]
struct DisambiguateRequest<'a> {
    word: &'a str,
    sentence: &'a str,
    word_index: usize,
}

#[derive(Debug, Deserialize)]
struct DisambiguateResponse {
    pronunciation_index: u32,
    #[serde(default)]
    phonemes: String,
}

/// HTTP client for the pronunciation service.
pub struct PronunciationClient {
    client: reqwest::Client,
    base_url: String,
}

impl PronunciationClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HomographResolver for PronunciationClient {
    async fn resolve(
        &self,
        word: &str,
        sentence: &str,
        word_index: usize,
    ) -> CoreResult<Pronunciation> {
        let url = format!("{}/disambiguate", self.base_url);
        let request = DisambiguateRequest {
            word,
            sentence,
            word_index,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("Disambiguation call failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Network(format!(
                "Disambiguation service returned {}",
                response.status()
            )));
        }

        let parsed: DisambiguateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Network(format!("Failed to parse disambiguation: {}", e)))?;

        log::debug!(
            "Disambiguated '{}' (index {} in sentence) -> pronunciation {}",
            word,
            word_index,
            parsed.pronunciation_index
        );

        Ok(Pronunciation {
            pronunciation_index: parsed.pronunciation_index,
            phonemes: parsed.phonemes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homograph_check_is_case_insensitive() {
        assert!(is_homograph("read"));
        assert!(is_homograph("Read"));
        assert!(is_homograph("TEAR"));
        assert!(!is_homograph("dragon"));
        assert!(!is_homograph(""));
    }

    #[test]
    fn fallback_is_index_zero() {
        let p = Pronunciation::default_pronunciation();
        assert_eq!(p.pronunciation_index, 0);
        assert!(p.phonemes.is_empty());
    }
}
