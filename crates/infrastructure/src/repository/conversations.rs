use std::collections::HashMap;

use application::{ConversationRepository, ConversationWriter, ConversationsPageQuery, UnitOfWork};
use async_trait::async_trait;
use domain::{
    Connection, Conversation, ConversationId, ConversationsSortBy, Cursor, NewConversation,
    NewParticipant, PageRequest, Participant, RepositoryResult, User, UserId,
};
use sqlx::{FromRow, PgPool};

use super::{
    map_sqlx_err, run_per_key, transaction, ConversationRecord, ParticipantRecord, UserRecord,
    CONVERSATION_COLUMNS, USER_COLUMNS,
};
use crate::paginator::CONVERSATIONS_OF_USER;

#[derive(Debug, FromRow)]
struct MemberRecord {
    conversation_id: i64,
    #[sqlx(flatten)]
    user: UserRecord,
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conversation_page(
        &self,
        user_id: UserId,
        page: PageRequest<ConversationsSortBy>,
    ) -> RepositoryResult<Connection<ConversationId>> {
        CONVERSATIONS_OF_USER
            .fetch_page(
                &self.pool,
                user_id.get(),
                &page,
                |(id,): (i64,)| Ok(ConversationId::new(id)),
                |id| Cursor::from(*id),
            )
            .await
            .map_err(|err| err.context(format!("conversations of user {user_id}")))
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_ids(&self, ids: &[ConversationId]) -> RepositoryResult<Vec<Conversation>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let records = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Conversation::try_from).collect()
    }

    async fn participants_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<User>>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let records = sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT p.conversation_id, {USER_COLUMNS} \
             FROM participants p JOIN users u ON u.id = p.user_id \
             WHERE p.conversation_id = ANY($1) \
             ORDER BY p.id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut grouped: HashMap<ConversationId, Vec<User>> = HashMap::new();
        for record in records {
            grouped
                .entry(ConversationId::new(record.conversation_id))
                .or_default()
                .push(User::from(record.user));
        }
        Ok(grouped)
    }

    async fn conversation_id_pages(
        &self,
        queries: &[ConversationsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<ConversationId>>> {
        let pages = run_per_key(
            queries,
            |query| query.key_id,
            |query| self.conversation_page(query.key_id, query.page),
        )
        .await?;
        Ok(pages.into_iter().collect())
    }
}

#[async_trait]
impl ConversationWriter for PgConversationRepository {
    async fn insert_conversation(
        &self,
        uow: &mut UnitOfWork,
        conversation: NewConversation,
    ) -> RepositoryResult<Conversation> {
        let tx = transaction(uow)?;
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (creator_id, title, conversation_type)
            VALUES ($1, $2, $3)
            RETURNING id, creator_id, title, conversation_type, created_at, updated_at, deleted_at
            "#,
        )
        .bind(conversation.creator_id.map(UserId::get))
        .bind(&conversation.title)
        .bind(conversation.conversation_type.as_str())
        .fetch_one(tx.connection())
        .await
        .map_err(|err| map_sqlx_err(err).context("insert conversation"))?;

        Conversation::try_from(record)
    }

    async fn insert_participants(
        &self,
        uow: &mut UnitOfWork,
        participants: &[NewParticipant],
    ) -> RepositoryResult<Vec<Participant>> {
        let tx = transaction(uow)?;
        if participants.is_empty() {
            return Ok(Vec::new());
        }

        let conversation_ids: Vec<i64> = participants
            .iter()
            .map(|p| p.conversation_id.get())
            .collect();
        let user_ids: Vec<i64> = participants.iter().map(|p| p.user_id.get()).collect();

        let records = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            INSERT INTO participants (conversation_id, user_id)
            SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[])
            RETURNING id, conversation_id, user_id, created_at, updated_at
            "#,
        )
        .bind(&conversation_ids)
        .bind(&user_ids)
        .fetch_all(tx.connection())
        .await
        .map_err(|err| map_sqlx_err(err).context("insert participants"))?;

        let mut inserted: Vec<Participant> = records.into_iter().map(Participant::from).collect();
        inserted.sort_by_key(|p| p.id);
        Ok(inserted)
    }
}
