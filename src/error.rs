use std::error::Error as StdError;

use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::repository::interface::Error as RepositoryError;

/// Classification of a failure, independent of where it was raised.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-supplied data or request shape is wrong
    #[strum(to_string = "invalid")]
    #[serde(rename = "invalid")]
    Validation,
    Internal,
    NotFound,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("docbase error: kind={kind} message={message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        let kind = match &err {
            RepositoryError::UniqueConstraintViolation(_) => ErrorKind::Conflict,
            RepositoryError::FKConstraintViolation(_) => ErrorKind::Validation,
            RepositoryError::InvalidInput(_) => ErrorKind::Validation,
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::SqlxError(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            RepositoryError::TransactionFinished
            | RepositoryError::SqlxError(_)
            | RepositoryError::Serde(_) => ErrorKind::Internal,
        };
        Error::new(kind, err.to_string())
    }
}

/// Walk an error and its sources looking for a domain [`Error`]. Anything that
/// isn't one is an internal failure.
pub fn error_kind(err: &(dyn StdError + 'static)) -> ErrorKind {
    find_domain_error(err)
        .map(|e| e.kind)
        .unwrap_or(ErrorKind::Internal)
}

pub fn error_message(err: &(dyn StdError + 'static)) -> String {
    find_domain_error(err)
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "Internal Error".to_string())
}

fn find_domain_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(domain) = e.downcast_ref::<Error>() {
            return Some(domain);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("while doing something")]
    struct Wrapper(#[source] Error);

    #[test]
    fn test_error_kind_of_domain_error() {
        let err = Error::new(ErrorKind::Conflict, "already there");
        assert_eq!(error_kind(&err), ErrorKind::Conflict);
        assert_eq!(error_message(&err), "already there");
    }

    #[test]
    fn test_error_kind_through_source_chain() {
        let err = Wrapper(Error::validation("bad name"));
        assert_eq!(error_kind(&err), ErrorKind::Validation);
        assert_eq!(error_message(&err), "bad name");
    }

    #[test]
    fn test_error_kind_of_foreign_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert_eq!(error_kind(&err), ErrorKind::Internal);
        assert_eq!(error_message(&err), "Internal Error");
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::Validation.to_string(), "invalid");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Validation).unwrap(),
            "\"invalid\""
        );
    }

    #[test]
    fn test_from_repository_error() {
        let err: Error =
            RepositoryError::UniqueConstraintViolation("duplicate".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err: Error = RepositoryError::SqlxError(sqlx::Error::RowNotFound).into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: Error = RepositoryError::SqlxError(sqlx::Error::PoolClosed).into();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
