//! 领域模型错误定义
//!
//! 定义了领域层、仓储层和事务协调器共享的错误类型，提供清晰的错误上下文。

use std::fmt;

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 资源不存在错误
    #[error("资源不存在: {resource_type} ID {resource_id}")]
    ResourceNotFound {
        resource_type: String,
        resource_id: String,
    },

    /// 身份无效或缺失
    #[error("未认证: {reason}")]
    Unauthorized { reason: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn resource_not_found(
        resource_type: impl Into<String>,
        resource_id: impl fmt::Display,
    ) -> Self {
        Self::ResourceNotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    /// 创建未认证错误
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 工作单元的生命周期状态
///
/// `NotStarted -> Open -> {Committed | RolledBack}`，终态不可逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// 当前状态下不能提交或回滚时给出对应的误用错误
    pub fn ensure_open(self) -> Result<(), TransactionError> {
        match self {
            Self::Open => Ok(()),
            Self::NotStarted => Err(TransactionError::NotActive),
            terminal => Err(TransactionError::Finished { state: terminal }),
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not-started",
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(label)
    }
}

/// 事务协调器误用错误（属于编程错误）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("no active unit of work in scope")]
    NotActive,
    #[error("unit of work already finished (state: {state})")]
    Finished { state: TransactionState },
    #[error("unit of work carries a different backing handle, expected {expected}")]
    HandleMismatch { expected: &'static str },
}

/// 仓储层错误
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("storage timed out: {message}")]
    Timeout { message: String },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// 在错误上附加调用点上下文，保留原始分类
    pub fn context(self, context: impl fmt::Display) -> Self {
        match self {
            Self::Storage { message, source } => Self::Storage {
                message: format!("{context}: {message}"),
                source,
            },
            Self::Timeout { message } => Self::Timeout {
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_storage_message() {
        let err = RepositoryError::storage("connection reset").context("insert participants");
        assert_eq!(
            err.to_string(),
            "storage error: insert participants: connection reset"
        );
    }

    #[test]
    fn context_keeps_not_found_sentinel() {
        let err = RepositoryError::NotFound.context("find user");
        assert!(err.is_not_found());
    }

    #[test]
    fn ensure_open_rejects_misuse() {
        assert!(TransactionState::Open.ensure_open().is_ok());
        assert_eq!(
            TransactionState::NotStarted.ensure_open(),
            Err(TransactionError::NotActive)
        );
        assert_eq!(
            TransactionState::Committed.ensure_open(),
            Err(TransactionError::Finished {
                state: TransactionState::Committed
            })
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!TransactionState::NotStarted.is_terminal());
        assert!(!TransactionState::Open.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::RolledBack.is_terminal());
    }
}
