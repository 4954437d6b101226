use std::io;

/// Reasons an inbound webhook request is rejected.
///
/// The `Display` text is what the client sees after `INVALID_PAYLOAD: `.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("GITHUB_SECRET not defined")]
    MissingSecret,

    #[error("Invalid HTTP method ({0})")]
    InvalidMethod(String),

    #[error("Missing GitHub event")]
    MissingEvent,

    #[error("Invalid event ({0}). Only push and ping events supported")]
    InvalidEvent(String),

    #[error("Missing GitHub signature")]
    MissingSignature,

    #[error("Malformed GitHub signature")]
    MalformedSignature,

    #[error("Invalid signature algorithm ({0}). Only sha1 supported")]
    InvalidAlgorithm(String),

    #[error("Failed to validate HMAC signature")]
    SignatureMismatch,

    #[error("Failed to find repository full name")]
    MissingFullName,

    #[error("Failed to find repository owner login")]
    MissingOwnerLogin,

    #[error("Failed to find target commit")]
    MissingCommit,

    #[error("Invalid repository full name ({0})")]
    InvalidRepositoryName(String),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read request body: {0}")]
    Body(#[from] io::Error),
}

/// Custom error type for github_webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error("Remote repository error: {0}")]
    RemoteError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Builder failed: {0}")]
    BuildFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Helper type for Results that use WebhookError
pub type Result<T> = std::result::Result<T, WebhookError>;
