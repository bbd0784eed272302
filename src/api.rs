//! Story service client.
//!
//! Thin typed wrapper over the backend API for the two calls this core
//! consumes: fetching a story and resolving a spread's illustration URL.
//! Timeouts live here, at the transport, not in the caches.

use crate::cache::story::Story;
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Seam over the app's authenticated-token store.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token (or none), for tests and unauthenticated environments.
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

pub struct StoryApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Arc<dyn TokenProvider>,
}

impl StoryApiClient {
    pub fn new(base_url: &str, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn get_story(&self, story_id: &str) -> CoreResult<Story> {
        let url = format!("{}/stories/{}", self.base_url, story_id);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("Failed to fetch story: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("story {}", story_id)));
        }
        if !response.status().is_success() {
            return Err(CoreError::Network(format!(
                "Story service returned {}",
                response.status()
            )));
        }

        let story = response
            .json()
            .await
            .map_err(|e| CoreError::Network(format!("Failed to parse story: {}", e)))?;
        Ok(story)
    }

    /// URL of one spread's illustration.
    pub fn get_spread_image_url(&self, story_id: &str, spread_number: i64) -> String {
        format!(
            "{}/stories/{}/spreads/{}/image",
            self.base_url, story_id, spread_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_image_url_shape() {
        let client = StoryApiClient::new(
            "https://api.storytime.app/",
            Arc::new(StaticToken(None)),
        );
        assert_eq!(
            client.get_spread_image_url("abc", 3),
            "https://api.storytime.app/stories/abc/spreads/3/image"
        );
    }
}
