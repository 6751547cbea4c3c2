//! Unified error types for ExecPilot.

use thiserror::Error;

/// Result type alias using ExecPilotError.
pub type Result<T> = std::result::Result<T, ExecPilotError>;

#[derive(Error, Debug)]
pub enum ExecPilotError {
    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Provider (mail, calendar, CRM) errors
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // User directory errors
    #[error("Failed to load users: {0}")]
    Load(String),

    // Channel errors
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Channel not connected: {0}")]
    ChannelNotConnected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ExecPilotError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Provider-side failures that the next cycle is expected to retry.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::AuthFailed(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExecPilotError::Provider("gmail quota".into());
        assert!(err.to_string().contains("gmail quota"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(ExecPilotError::config("x"), ExecPilotError::Config(_)));
        assert!(matches!(ExecPilotError::provider("x"), ExecPilotError::Provider(_)));
        assert!(matches!(ExecPilotError::load("x"), ExecPilotError::Load(_)));
        assert!(matches!(ExecPilotError::dispatch("x"), ExecPilotError::Dispatch(_)));
    }

    #[test]
    fn test_provider_failure_classification() {
        assert!(ExecPilotError::RateLimited("slow down".into()).is_provider_failure());
        assert!(ExecPilotError::timeout("30s").is_provider_failure());
        assert!(!ExecPilotError::config("bad").is_provider_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExecPilotError = io_err.into();
        assert!(matches!(err, ExecPilotError::Io(_)));
    }
}
