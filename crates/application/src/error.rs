use domain::{DomainError, RepositoryError, TransactionError};
use thiserror::Error;

use crate::loader::BatchLoadError;

/// 对外（图谱 API 层）暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Invalid,
    Unauthorized,
    NotFound,
    Internal,
    Timeout,
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error(transparent)]
    BatchLoad(#[from] BatchLoadError),
    /// 写入失败后回滚也失败，原始错误在前
    #[error("{source}; rollback failed: {rollback}")]
    Rollback {
        source: Box<ApplicationError>,
        rollback: RepositoryError,
    },
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

impl ApplicationError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        ApplicationError::Unauthenticated(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(err) => domain_kind(err),
            ApplicationError::Repository(err) => repository_kind(err),
            ApplicationError::Validation(_) => ErrorKind::Invalid,
            ApplicationError::BatchLoad(err) => repository_kind(err.repository_error()),
            ApplicationError::Rollback { source, .. } => source.kind(),
            ApplicationError::Unauthenticated(_) => ErrorKind::Unauthorized,
        }
    }
}

impl From<TransactionError> for ApplicationError {
    fn from(value: TransactionError) -> Self {
        ApplicationError::Repository(RepositoryError::Transaction(value))
    }
}

fn domain_kind(err: &DomainError) -> ErrorKind {
    match err {
        DomainError::ValidationError { .. } => ErrorKind::Invalid,
        DomainError::ResourceNotFound { .. } => ErrorKind::NotFound,
        DomainError::Unauthorized { .. } => ErrorKind::Unauthorized,
    }
}

fn repository_kind(err: &RepositoryError) -> ErrorKind {
    match err {
        RepositoryError::NotFound => ErrorKind::NotFound,
        RepositoryError::Timeout { .. } => ErrorKind::Timeout,
        RepositoryError::Domain(err) => domain_kind(err),
        RepositoryError::Storage { .. } | RepositoryError::Transaction(_) => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_failure_keeps_original_classification() {
        let err = ApplicationError::Rollback {
            source: Box::new(ApplicationError::Repository(RepositoryError::timeout(
                "insert participants",
            ))),
            rollback: RepositoryError::storage("connection closed"),
        };

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let rendered = err.to_string();
        assert!(rendered.starts_with("repository error: storage timed out"));
        assert!(rendered.ends_with("rollback failed: storage error: connection closed"));
    }

    #[test]
    fn classifies_sentinels() {
        assert_eq!(
            ApplicationError::from(RepositoryError::NotFound).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ApplicationError::from(DomainError::validation_error("first", "bad")).kind(),
            ErrorKind::Invalid
        );
        assert_eq!(
            ApplicationError::unauthenticated("expired").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            ApplicationError::from(TransactionError::NotActive).kind(),
            ErrorKind::Internal
        );
    }
}
