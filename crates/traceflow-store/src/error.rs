use std::fmt;

/// Result type for traceflow-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the storage layer
#[derive(Debug)]
pub enum Error {
    /// Serializing or parsing a tier failed
    Json(serde_json::Error),

    /// SQLite backend failed
    Database(rusqlite::Error),

    /// Backend construction failed (opening files, creating directories)
    Backend(anyhow::Error),

    /// The backend refused a write that would exceed its byte quota
    QuotaExceeded { needed: usize, quota: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Backend(err) => write!(f, "Backend error: {:#}", err),
            Error::QuotaExceeded { needed, quota } => {
                write!(f, "Quota exceeded: {} bytes needed, {} allowed", needed, quota)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::Database(err) => Some(err),
            Error::Backend(err) => Some(&**err),
            Error::QuotaExceeded { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Backend(err)
    }
}
