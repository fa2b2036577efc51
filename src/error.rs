//! Error taxonomy (spec §7).

use thiserror::Error;

/// The six kinds of failure a download operation can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    NoMatch,
    Network,
    ArchiveIntegrity,
    Canceled,
    Internal,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("config error: {0}")]
    Config(String),

    #[error("no file matched the given patterns")]
    NoMatch,

    #[error("network error: {0}")]
    Network(String),

    #[error("archive integrity check failed for {path}: {reason}")]
    ArchiveIntegrity { path: String, reason: String },

    #[error("operation canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DownloadError::Config(_) => ErrorCategory::Config,
            DownloadError::NoMatch => ErrorCategory::NoMatch,
            DownloadError::Network(_) => ErrorCategory::Network,
            DownloadError::ArchiveIntegrity { .. } => ErrorCategory::ArchiveIntegrity,
            DownloadError::Canceled => ErrorCategory::Canceled,
            DownloadError::Internal(_) | DownloadError::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Retriable errors are the ones a `RetryPolicy` should loop on (§7).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::ArchiveIntegrity
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for DownloadError {
    fn from(err: reqwest_middleware::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

impl From<suppaftp::FtpError> for DownloadError {
    fn from(err: suppaftp::FtpError) -> Self {
        DownloadError::Network(err.to_string())
    }
}

impl From<russh::Error> for DownloadError {
    fn from(err: russh::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for DownloadError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

impl From<redis::RedisError> for DownloadError {
    fn from(err: redis::RedisError) -> Self {
        DownloadError::Internal(format!("session store: {err}"))
    }
}

impl From<lapin::Error> for DownloadError {
    fn from(err: lapin::Error) -> Self {
        DownloadError::Internal(format!("queue: {err}"))
    }
}

impl From<serde_yaml::Error> for DownloadError {
    fn from(err: serde_yaml::Error) -> Self {
        DownloadError::Config(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for DownloadError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        DownloadError::Internal(format!("message codec: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
