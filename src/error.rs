use std::fmt;

use thiserror::Error;

/// Broad category of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Network,
    Credentials,
    Service,
    InvalidInput,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::Network => "network",
            ErrorKind::Credentials => "credentials",
            ErrorKind::Service => "service",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error returned by every [`ObjectStore`](crate::store::ObjectStore) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<ErrorKind> for StoreError {
    fn from(kind: ErrorKind) -> Self {
        StoreError::new(kind, kind.to_string())
    }
}

/// Errors that abort a whole run. Per-key failures never surface here.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to connect to storage backend: {0}")]
    Connect(#[source] StoreError),

    #[error("cannot access bucket {bucket}: {source}")]
    Bucket {
        bucket: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to list bucket {bucket}: {source}")]
    Listing {
        bucket: String,
        #[source]
        source: StoreError,
    },
}

pub type CopyResult<T> = Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_carries_category() {
        let err = StoreError::new(ErrorKind::AccessDenied, "403 Forbidden");
        assert_eq!(err.to_string(), "access denied: 403 Forbidden");
        assert!(!err.is_not_found());
        assert!(StoreError::not_found("missing").is_not_found());
    }

    #[test]
    fn listing_error_names_bucket() {
        let err = CopyError::Listing {
            bucket: "src".into(),
            source: StoreError::new(ErrorKind::Network, "connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "failed to list bucket src: network: connection reset"
        );
    }
}
