use thiserror::Error;

/// Typed error hierarchy for the offline core.
///
/// Serializes as a plain string (the UI layer's `error.message` convention)
/// while giving Rust code typed variants that can be matched or propagated
/// with `?`. Cancellation is its own variant so callers can tell a cancelled
/// playback or synthesis apart from a real failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Synthesis(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// True when this error is the cancellation marker rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

/// Serialize as a plain string so the UI layer receives the same
/// `"error message"` string it already expects.
impl serde::Serialize for CoreError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Network(e.to_string())
    }
}

/// Allows `.map_err(|e| format!("…", e))?` and `ok_or_else(|| format!(…))?`
/// to coerce into CoreError without changing the call sites.
impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

/// Allows `.ok_or("literal string")?` to coerce into CoreError.
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}
