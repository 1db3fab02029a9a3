use serde::Serialize;
use thiserror::Error;

/// Client-facing error category attached to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AuthError,
    Timeout,
    FetchError,
    ConversionError,
    StorageError,
    StorageUnavailable,
    InvalidRequest,
}

/// Terminal pipeline error. Each variant carries free-text detail for the
/// logs; `client_message` is the stable phrasing surfaced to clients.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("book not found: {0}")]
    NotFound(String),

    #[error("upstream authentication failed: {0}")]
    Auth(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream fetch failed: {0}")]
    Fetch(String),

    #[error("conversion failed and fallback copy failed: {0}")]
    Conversion(String),

    #[error("object store operation failed: {0}")]
    Storage(String),

    #[error("object store is not configured")]
    StorageUnavailable,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Auth(_) => ErrorKind::AuthError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Fetch(_) => ErrorKind::FetchError,
            Self::Conversion(_) => ErrorKind::ConversionError,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::StorageUnavailable => ErrorKind::StorageUnavailable,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Stable message shown in status and stream payloads.
    pub fn client_message(&self) -> String {
        match self {
            Self::NotFound(_) => {
                "Book not found. Please check the Book ID and try again.".to_string()
            }
            Self::Auth(_) => {
                "Authentication failed. Please update your cookies file.".to_string()
            }
            Self::Timeout(_) => "Request timed out. Please try again.".to_string(),
            Self::Fetch(detail) => format!("Failed to download book: {detail}"),
            Self::Conversion(detail) => format!("Failed to save EPUB file: {detail}"),
            Self::Storage(_) => "Failed to upload to storage".to_string(),
            Self::StorageUnavailable => {
                "Storage service unavailable - please contact administrator".to_string()
            }
            Self::InvalidRequest(detail) => detail.clone(),
        }
    }
}

/// Error returned by the upstream provider client. Typed variants replace
/// substring probing on error text when classifying failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("book not found upstream (status {status})")]
    NotFound { status: u16 },

    #[error("upstream rejected credentials (status {status})")]
    Auth { status: u16 },

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected upstream response: {0}")]
    Protocol(String),

    #[error("io error during fetch: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { status } => {
                PipelineError::NotFound(format!("upstream returned status {status}"))
            }
            FetchError::Auth { status } => {
                PipelineError::Auth(format!("upstream returned status {status}"))
            }
            FetchError::Timeout => PipelineError::Timeout("upstream fetch".to_string()),
            FetchError::Http(e) if e.is_timeout() => {
                PipelineError::Timeout(format!("upstream fetch: {e}"))
            }
            FetchError::Http(e) => PipelineError::Fetch(e.to_string()),
            FetchError::Protocol(detail) => PipelineError::Fetch(detail),
            FetchError::Io(e) => PipelineError::Storage(format!("local write failed: {e}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_to_structural_kinds() {
        let err: PipelineError = FetchError::NotFound { status: 404 }.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: PipelineError = FetchError::Auth { status: 401 }.into();
        assert_eq!(err.kind(), ErrorKind::AuthError);

        let err: PipelineError = FetchError::Timeout.into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn client_messages_are_stable() {
        assert_eq!(
            PipelineError::NotFound("whatever detail".into()).client_message(),
            "Book not found. Please check the Book ID and try again."
        );
        assert_eq!(
            PipelineError::StorageUnavailable.client_message(),
            "Storage service unavailable - please contact administrator"
        );
    }
}
