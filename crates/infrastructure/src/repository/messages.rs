use std::collections::HashMap;

use application::{MessageRepository, MessageWriter, MessagesPageQuery, UnitOfWork};
use async_trait::async_trait;
use domain::{
    Connection, ConversationId, Cursor, Message, MessagesSortBy, NewMessage, PageRequest,
    RepositoryResult,
};
use sqlx::PgPool;

use super::{map_sqlx_err, run_per_key, transaction, MessageRecord};
use crate::paginator::MESSAGES_IN_CONVERSATION;

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn message_page(
        &self,
        conversation_id: ConversationId,
        page: PageRequest<MessagesSortBy>,
    ) -> RepositoryResult<Connection<Message>> {
        MESSAGES_IN_CONVERSATION
            .fetch_page(
                &self.pool,
                conversation_id.get(),
                &page,
                |record: MessageRecord| Message::try_from(record),
                |message: &Message| Cursor::from(message.id),
            )
            .await
            .map_err(|err| err.context(format!("messages of conversation {conversation_id}")))
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn message_pages(
        &self,
        queries: &[MessagesPageQuery],
    ) -> RepositoryResult<HashMap<ConversationId, Connection<Message>>> {
        let pages = run_per_key(
            queries,
            |query| query.key_id,
            |query| self.message_page(query.key_id, query.page),
        )
        .await?;
        Ok(pages.into_iter().collect())
    }

    async fn messages_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<Message>>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, message_type, content, created_at, updated_at, deleted_at
            FROM messages
            WHERE conversation_id = ANY($1) AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut grouped: HashMap<ConversationId, Vec<Message>> = HashMap::new();
        for record in records {
            let message = Message::try_from(record)?;
            grouped
                .entry(message.conversation_id)
                .or_default()
                .push(message);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl MessageWriter for PgMessageRepository {
    async fn insert_message(
        &self,
        uow: &mut UnitOfWork,
        message: NewMessage,
    ) -> RepositoryResult<Message> {
        let tx = transaction(uow)?;
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (conversation_id, sender_id, message_type, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, conversation_id, sender_id, message_type, content, created_at, updated_at, deleted_at
            "#,
        )
        .bind(message.conversation_id.get())
        .bind(message.sender_id.get())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .fetch_one(tx.connection())
        .await
        .map_err(|err| map_sqlx_err(err).context("insert message"))?;

        Message::try_from(record)
    }
}
