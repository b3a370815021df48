use std::collections::HashMap;

use application::{FriendsPageQuery, UnitOfWork, UserRepository, UserUpsert, UserWriter};
use async_trait::async_trait;
use domain::{
    Connection, Cursor, FriendsSortBy, NewUser, PageRequest, RepositoryResult, User, UserId,
};
use sqlx::{FromRow, PgPool};

use super::{map_sqlx_err, run_per_key, transaction, UserRecord, USER_COLUMNS};
use crate::paginator::FRIENDS_OF_USER;

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn friend_page(
        &self,
        user_id: UserId,
        page: PageRequest<FriendsSortBy>,
    ) -> RepositoryResult<Connection<UserId>> {
        FRIENDS_OF_USER
            .fetch_page(
                &self.pool,
                user_id.get(),
                &page,
                |(id,): (i64,)| Ok(UserId::new(id)),
                |id| Cursor::from(*id),
            )
            .await
            .map_err(|err| err.context(format!("friends of user {user_id}")))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_ids(&self, ids: &[UserId]) -> RepositoryResult<Vec<User>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(User::from).collect())
    }

    async fn find_by_subject(&self, subject: &str) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.provider_subject = $1"
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(User::from))
    }

    async fn friend_id_pages(
        &self,
        queries: &[FriendsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<UserId>>> {
        let pages = run_per_key(
            queries,
            |query| query.key_id,
            |query| self.friend_page(query.key_id, query.page),
        )
        .await?;
        Ok(pages.into_iter().collect())
    }
}

#[derive(Debug, FromRow)]
struct UpsertedUserRecord {
    #[sqlx(flatten)]
    user: UserRecord,
    created: bool,
}

#[async_trait]
impl UserWriter for PgUserRepository {
    async fn upsert_user(
        &self,
        uow: &mut UnitOfWork,
        user: NewUser,
    ) -> RepositoryResult<UserUpsert> {
        let tx = transaction(uow)?;
        // 冲突时空更新以返回已有行，`xmax = 0` 只在本次插入的行上成立
        let record = sqlx::query_as::<_, UpsertedUserRecord>(&format!(
            r#"
            INSERT INTO users AS u (name, picture_url, provider, provider_subject, email_address, email_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider_subject) DO UPDATE SET updated_at = u.updated_at
            RETURNING {USER_COLUMNS}, (u.xmax = 0) AS created
            "#
        ))
        .bind(&user.name)
        .bind(&user.picture_url)
        .bind(&user.provider)
        .bind(&user.provider_subject)
        .bind(&user.email_address)
        .bind(user.email_verified)
        .fetch_one(tx.connection())
        .await
        .map_err(|err| map_sqlx_err(err).context("upsert user"))?;

        let user = User::from(record.user);
        Ok(if record.created {
            UserUpsert::Created(user)
        } else {
            UserUpsert::Existing(user)
        })
    }
}
