//! Crate-wide error type.
//!
//! Every fallible operation returns [`Error`]. Callers that only care about
//! the broad category match on [`Error::kind`]; callers that need the details
//! match on the variant.

use thiserror::Error;

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced user, message, request or event does not exist.
    NotFound,
    /// The operation clashes with existing state (duplicate email, pending
    /// request, constraint violation).
    Conflict,
    /// Bad input, bad stored data, or an out-of-range page.
    Invalid,
    /// The database or the connection pool could not serve the request.
    Unavailable,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {source}")]
    Storage {
        kind: ErrorKind,
        #[source]
        source: rusqlite::Error,
    },

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed stored data: {0}")]
    Malformed(String),

    #[error("invalid page number {page} (conversation has {page_count} page(s))")]
    InvalidPage { page: u32, page_count: u32 },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage { kind, .. } => *kind,
            Error::Pool(_) | Error::Io(_) => ErrorKind::Unavailable,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Malformed(_)
            | Error::Serde(_)
            | Error::InvalidPage { .. }
            | Error::Validation(_) => ErrorKind::Invalid,
        }
    }

    /// True for rejected caller input, false for everything raised by the
    /// repository layer.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn not_found(what: &str, id: i64) -> Self {
        Error::NotFound(format!("{what} {id}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        let kind = match &e {
            rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ErrorKind::Conflict
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..) => ErrorKind::Invalid,
            _ => ErrorKind::Unavailable,
        };
        Error::Storage { kind, source: e }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(Error::not_found("user", 3).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::InvalidPage {
                page: 4,
                page_count: 3
            }
            .kind(),
            ErrorKind::Invalid
        );
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert!(Error::validation("empty text").is_validation());
        assert!(!Error::Malformed("ts".into()).is_validation());
    }

    #[test]
    fn sqlite_errors_are_classified() {
        let no_rows: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(no_rows.kind(), ErrorKind::NotFound);

        let constraint: Error = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: users.email".into()),
        )
        .into();
        assert_eq!(constraint.kind(), ErrorKind::Conflict);

        let closed: Error = rusqlite::Error::InvalidQuery.into();
        assert_eq!(closed.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn invalid_page_message_names_the_page() {
        let e = Error::InvalidPage {
            page: 0,
            page_count: 1,
        };
        assert_eq!(
            e.to_string(),
            "invalid page number 0 (conversation has 1 page(s))"
        );
    }
}
