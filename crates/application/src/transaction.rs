//! 事务写入协调器
//!
//! 一个 [`UnitOfWork`] 持有唯一的事务句柄，按值沿调用链传递给需要参与同一事务的写操作。
//! 状态机为 `NotStarted -> Open -> {Committed | RolledBack}`，终态之后再提交或回滚会返回
//! [`TransactionError`]。

use std::any::{type_name, Any};

use async_trait::async_trait;
use domain::{RepositoryResult, TransactionError, TransactionState};

use crate::error::ApplicationError;

/// 底层存储的事务句柄
#[async_trait]
pub trait TransactionHandle: Send {
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;

    /// 仓储实现据此取回自己的具体句柄类型
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// 开启工作单元
#[async_trait]
pub trait Transactor: Send + Sync {
    async fn begin(&self) -> RepositoryResult<UnitOfWork>;
}

pub struct UnitOfWork {
    state: TransactionState,
    handle: Option<Box<dyn TransactionHandle>>,
}

impl UnitOfWork {
    pub fn begin(handle: Box<dyn TransactionHandle>) -> Self {
        Self {
            state: TransactionState::Open,
            handle: Some(handle),
        }
    }

    /// 尚未开启的工作单元，任何写入、提交或回滚都会失败
    pub fn not_started() -> Self {
        Self {
            state: TransactionState::NotStarted,
            handle: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    pub fn handle_mut<T: TransactionHandle + 'static>(
        &mut self,
    ) -> Result<&mut T, TransactionError> {
        self.state.ensure_open()?;
        self.handle
            .as_mut()
            .ok_or(TransactionError::NotActive)?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(TransactionError::HandleMismatch {
                expected: type_name::<T>(),
            })
    }

    pub async fn commit(&mut self) -> RepositoryResult<()> {
        let handle = self.take_open_handle()?;
        match handle.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(err) => {
                // 提交失败时句柄已被消费，底层事务随之放弃
                self.state = TransactionState::RolledBack;
                Err(err.context("commit unit of work"))
            }
        }
    }

    pub async fn rollback(&mut self) -> RepositoryResult<()> {
        let handle = self.take_open_handle()?;
        self.state = TransactionState::RolledBack;
        handle
            .rollback()
            .await
            .map_err(|err| err.context("rollback unit of work"))
    }

    fn take_open_handle(&mut self) -> Result<Box<dyn TransactionHandle>, TransactionError> {
        self.state.ensure_open()?;
        self.handle.take().ok_or(TransactionError::NotActive)
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("工作单元未提交即被丢弃，底层事务将被放弃");
        }
    }
}

/// 根据写入结果结束工作单元：成功则提交，失败则回滚并返回原始错误
///
/// 回滚本身失败时返回 [`ApplicationError::Rollback`]，两个错误都保留。
pub async fn complete<T>(
    uow: &mut UnitOfWork,
    result: Result<T, ApplicationError>,
) -> Result<T, ApplicationError> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => Err(rollback_on_error(uow, err).await),
    }
}

pub async fn rollback_on_error(uow: &mut UnitOfWork, err: ApplicationError) -> ApplicationError {
    match uow.rollback().await {
        Ok(()) => err,
        Err(rollback) => {
            tracing::error!(error = %err, rollback_error = %rollback, "回滚工作单元失败");
            ApplicationError::Rollback {
                source: Box::new(err),
                rollback,
            }
        }
    }
}
