//! PostgreSQL 工作单元

use std::any::Any;

use application::{TransactionHandle, Transactor, UnitOfWork};
use async_trait::async_trait;
use domain::RepositoryResult;
use sqlx::{PgConnection, PgPool, Postgres};

use crate::repository::map_sqlx_err;

/// 工作单元持有的数据库事务
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.inner
    }
}

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let this = *self;
        this.inner.commit().await.map_err(map_sqlx_err)
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        let this = *self;
        this.inner.rollback().await.map_err(map_sqlx_err)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Clone)]
pub struct PgTransactor {
    pool: PgPool,
}

impl PgTransactor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transactor for PgTransactor {
    async fn begin(&self) -> RepositoryResult<UnitOfWork> {
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|err| map_sqlx_err(err).context("begin unit of work"))?;
        tracing::debug!("开启数据库事务");
        Ok(UnitOfWork::begin(Box::new(PgTransaction { inner })))
    }
}
