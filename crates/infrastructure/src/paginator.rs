//! 键集分页 SQL
//!
//! 每种分页由 [`KeysetQuery`] 描述：查询列、来源表、别名和限定范围。
//! 范围条件固定以 `$1` 引用父实体 ID。排序列只来自 [`SortKey::column`] 白名单，
//! 始终以 `(排序列, id)` 升序排列。游标行只按父实体范围定位，不看软删除标记，
//! 已删除的游标行仍可作为翻页起点；游标不在该父实体下时结果为空页。

use domain::{Connection, Cursor, PageRequest, RepositoryResult, SortKey};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};

use crate::repository::map_sqlx_err;

#[derive(Debug, Clone, Copy)]
pub struct KeysetQuery {
    pub select: &'static str,
    pub from: &'static str,
    pub alias: &'static str,
    pub scope: &'static str,
    /// 定位游标行的范围，不含软删除过滤
    pub cursor_scope: &'static str,
}

/// 某会话内的消息
pub const MESSAGES_IN_CONVERSATION: KeysetQuery = KeysetQuery {
    select: "m.id, m.conversation_id, m.sender_id, m.message_type, m.content, \
             m.created_at, m.updated_at, m.deleted_at",
    from: "messages m",
    alias: "m",
    scope: "m.conversation_id = $1 AND m.deleted_at IS NULL",
    cursor_scope: "m.conversation_id = $1",
};

/// 某用户参与的会话
pub const CONVERSATIONS_OF_USER: KeysetQuery = KeysetQuery {
    select: "c.id",
    from: "conversations c",
    alias: "c",
    scope: "c.deleted_at IS NULL AND EXISTS (\
                SELECT 1 FROM participants p \
                WHERE p.conversation_id = c.id AND p.user_id = $1)",
    cursor_scope: "EXISTS (\
                SELECT 1 FROM participants p \
                WHERE p.conversation_id = c.id AND p.user_id = $1)",
};

/// 与某用户至少共享一个会话的其他用户
pub const FRIENDS_OF_USER: KeysetQuery = KeysetQuery {
    select: "u.id",
    from: "users u",
    alias: "u",
    scope: "u.id <> $1 AND EXISTS (\
                SELECT 1 FROM participants mine \
                JOIN participants theirs ON theirs.conversation_id = mine.conversation_id \
                WHERE mine.user_id = $1 AND theirs.user_id = u.id)",
    cursor_scope: "u.id <> $1 AND EXISTS (\
                SELECT 1 FROM participants mine \
                JOIN participants theirs ON theirs.conversation_id = mine.conversation_id \
                WHERE mine.user_id = $1 AND theirs.user_id = u.id)",
};

impl KeysetQuery {
    /// 游标行的排序值，已软删除的行同样可以定位
    fn cursor_row(&self, column: &str) -> String {
        format!(
            "(SELECT {alias}.{column}, {alias}.id FROM {from} WHERE {scope} AND {alias}.id = $2)",
            alias = self.alias,
            from = self.from,
            scope = self.cursor_scope,
        )
    }

    /// 取一页的 SQL；有游标时参数为 `$1` 父 ID、`$2` 游标、`$3` 上限，否则 `$2` 为上限
    pub fn page_sql(&self, column: &str, with_cursor: bool) -> String {
        let alias = self.alias;
        let (after, limit) = if with_cursor {
            (
                format!(
                    " AND ({alias}.{column}, {alias}.id) > {}",
                    self.cursor_row(column)
                ),
                "$3",
            )
        } else {
            (String::new(), "$2")
        };

        format!(
            "SELECT {select} FROM {from} WHERE {scope}{after} \
             ORDER BY {alias}.{column} ASC, {alias}.id ASC LIMIT {limit}",
            select = self.select,
            from = self.from,
            scope = self.scope,
        )
    }

    /// 游标之前是否还有行
    pub fn has_previous_sql(&self, column: &str) -> String {
        format!(
            "SELECT EXISTS (SELECT 1 FROM {from} WHERE {scope} \
             AND ({alias}.{column}, {alias}.id) < {cursor})",
            from = self.from,
            scope = self.scope,
            alias = self.alias,
            cursor = self.cursor_row(column),
        )
    }

    /// 执行一页查询并组装连接
    ///
    /// 排序方向只作为参数携带，结果始终升序。
    pub async fn fetch_page<R, T, S>(
        &self,
        pool: &PgPool,
        key_id: i64,
        page: &PageRequest<S>,
        convert: impl Fn(R) -> RepositoryResult<T>,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> RepositoryResult<Connection<T>>
    where
        R: for<'r> FromRow<'r, PgRow> + Send + Unpin,
        S: SortKey,
    {
        let column = page.sort_by.column();

        let (records, has_previous_page) = match page.after {
            Some(after) => {
                let sql = self.page_sql(column, true);
                let records: Vec<R> = sqlx::query_as(&sql)
                    .bind(key_id)
                    .bind(after.get())
                    .bind(page.fetch_limit())
                    .fetch_all(pool)
                    .await
                    .map_err(map_sqlx_err)?;

                let sql = self.has_previous_sql(column);
                let has_previous: bool = sqlx::query_scalar(&sql)
                    .bind(key_id)
                    .bind(after.get())
                    .fetch_one(pool)
                    .await
                    .map_err(map_sqlx_err)?;
                (records, has_previous)
            }
            None => {
                let sql = self.page_sql(column, false);
                let records: Vec<R> = sqlx::query_as(&sql)
                    .bind(key_id)
                    .bind(page.fetch_limit())
                    .fetch_all(pool)
                    .await
                    .map_err(map_sqlx_err)?;
                (records, false)
            }
        };

        let rows = records
            .into_iter()
            .map(convert)
            .collect::<RepositoryResult<Vec<T>>>()?;

        Ok(Connection::from_rows(
            rows,
            page.page_size(),
            has_previous_page,
            cursor_of,
        ))
    }
}
