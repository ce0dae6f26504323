use thiserror::Error;

/// Errors returned by a reading source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Reading source timed out")]
    Timeout,

    #[error("Reading source unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid response from reading source: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else {
            SourceError::Unreachable(e.to_string())
        }
    }
}

/// Errors that can occur when delivering a finding to a channel sink
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Channel rate limit exceeded")]
    RateLimited,

    #[error("Channel unreachable: {0}")]
    Unreachable(String),

    #[error("Channel rejected the notification: {0}")]
    Rejected(String),

    #[error("Channel delivery timed out")]
    Timeout,
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SinkError::Timeout
        } else {
            SinkError::Unreachable(e.to_string())
        }
    }
}

impl From<lettre::transport::smtp::Error> for SinkError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        if e.is_timeout() {
            SinkError::Timeout
        } else if e.is_permanent() {
            SinkError::Rejected(e.to_string())
        } else {
            SinkError::Unreachable(e.to_string())
        }
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors raised by the monitoring scheduler lifecycle
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler cannot start from state {0:?}")]
    InvalidState(crate::scheduler::SchedulerState),

    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler task failed: {0}")]
    TaskFailed(String),
}
