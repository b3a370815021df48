//! 内存实现的仓储与事务
//!
//! 事务内的写入先暂存，提交时一次性生效，回滚或丢弃时全部放弃。
//! 用于用例测试，只在测试或启用 `test-support` 特性时编译。

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{
    paginate, paginate_visible, Connection, Conversation, ConversationId, ConversationType,
    Cursor, Message, MessageId, MessageType, NewConversation, NewMessage, NewParticipant, NewUser,
    Participant, ParticipantId, RepositoryError, RepositoryResult, User, UserId,
};
use tokio::sync::RwLock;

use crate::loader::LoaderSources;
use crate::repository::{
    ConversationRepository, ConversationWriter, ConversationsPageQuery, FriendsPageQuery,
    MessageRepository, MessageWriter, MessagesPageQuery, UserRepository, UserUpsert, UserWriter,
};
use crate::transaction::{TransactionHandle, Transactor, UnitOfWork};

/// 可注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    InsertConversation,
    InsertParticipants,
    InsertMessage,
    Commit,
    Rollback,
    /// 所有读操作
    Reads,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    conversations: BTreeMap<ConversationId, Conversation>,
    participants: BTreeMap<ParticipantId, Participant>,
    messages: BTreeMap<MessageId, Message>,
}

#[derive(Debug, Clone)]
enum Staged {
    User(User),
    Conversation(Conversation),
    Participant(Participant),
    Message(Message),
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    sequence: Arc<AtomicI64>,
    faults: Arc<Mutex<HashSet<Fault>>>,
    reads: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            sequence: Arc::new(AtomicI64::new(1)),
            faults: Arc::new(Mutex::new(HashSet::new())),
            reads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn loader_sources(&self) -> LoaderSources {
        LoaderSources {
            users: Arc::new(self.clone()),
            conversations: Arc::new(self.clone()),
            messages: Arc::new(self.clone()),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.lock_faults().insert(fault);
    }

    pub fn clear(&self, fault: Fault) {
        self.lock_faults().remove(&fault);
    }

    /// 某个读方法被调用的次数
    pub fn read_count(&self, method: &str) -> usize {
        self.lock_reads().get(method).copied().unwrap_or(0)
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.tables.read().await.conversations.len()
    }

    pub async fn participant_count(&self) -> usize {
        self.tables.read().await.participants.len()
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }

    pub async fn seed_user(&self, name: &str) -> User {
        let user = self.new_user(NewUser {
            name: name.to_string(),
            picture_url: format!("https://img.example.com/{name}.png"),
            provider: "password".to_string(),
            provider_subject: format!("subject-{name}"),
            email_address: format!("{}@example.com", name.to_lowercase()),
            email_verified: true,
        });
        self.apply(vec![Staged::User(user.clone())]).await;
        user
    }

    /// 直接写入一个会话及其参与者
    pub async fn seed_conversation(&self, creator: UserId, members: &[UserId]) -> Conversation {
        let conversation = self.new_conversation(NewConversation {
            creator_id: Some(creator),
            title: String::new(),
            conversation_type: ConversationType::for_recipients(members.len()),
        });

        let mut staged = vec![Staged::Conversation(conversation.clone())];
        staged.extend(members.iter().map(|user_id| {
            Staged::Participant(self.new_participant(NewParticipant {
                conversation_id: conversation.id,
                user_id: *user_id,
            }))
        }));
        self.apply(staged).await;
        conversation
    }

    pub async fn seed_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Message {
        let message = self.new_message(NewMessage {
            conversation_id,
            sender_id,
            message_type: MessageType::Text,
            content: content.to_string(),
        });
        self.apply(vec![Staged::Message(message.clone())]).await;
        message
    }

    /// 软删除一条消息，行仍保留
    pub async fn soft_delete_message(&self, id: MessageId) {
        let now = chrono::Utc::now();
        if let Some(message) = self.tables.write().await.messages.get_mut(&id) {
            message.deleted_at = Some(now);
        }
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn new_user(&self, user: NewUser) -> User {
        user.into_user(UserId::new(self.next_id()))
    }

    fn new_conversation(&self, conversation: NewConversation) -> Conversation {
        let now = chrono::Utc::now();
        Conversation {
            id: ConversationId::new(self.next_id()),
            creator_id: conversation.creator_id,
            title: conversation.title,
            conversation_type: conversation.conversation_type,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn new_participant(&self, participant: NewParticipant) -> Participant {
        let now = chrono::Utc::now();
        Participant {
            id: ParticipantId::new(self.next_id()),
            conversation_id: participant.conversation_id,
            user_id: participant.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_message(&self, message: NewMessage) -> Message {
        let now = chrono::Utc::now();
        Message {
            id: MessageId::new(self.next_id()),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            message_type: message.message_type,
            content: message.content,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    async fn apply(&self, staged: Vec<Staged>) {
        let mut tables = self.tables.write().await;
        for write in staged {
            match write {
                Staged::User(user) => {
                    tables.users.insert(user.id, user);
                }
                Staged::Conversation(conversation) => {
                    tables.conversations.insert(conversation.id, conversation);
                }
                Staged::Participant(participant) => {
                    tables.participants.insert(participant.id, participant);
                }
                Staged::Message(message) => {
                    tables.messages.insert(message.id, message);
                }
            }
        }
    }

    fn check(&self, fault: Fault, operation: &str) -> RepositoryResult<()> {
        if self.lock_faults().contains(&fault) {
            return Err(RepositoryError::storage(format!(
                "injected failure: {operation}"
            )));
        }
        Ok(())
    }

    fn record_read(&self, method: &'static str) -> RepositoryResult<()> {
        *self.lock_reads().entry(method).or_insert(0) += 1;
        self.check(Fault::Reads, method)
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, HashSet<Fault>> {
        self.faults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_reads(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, usize>> {
        self.reads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn transaction<'a>(&self, uow: &'a mut UnitOfWork) -> RepositoryResult<&'a mut MemoryTransaction> {
        Ok(uow.handle_mut::<MemoryTransaction>()?)
    }
}

impl Tables {
    fn conversations_of(&self, user_id: UserId) -> HashSet<ConversationId> {
        self.participants
            .values()
            .filter(|participant| participant.user_id == user_id)
            .map(|participant| participant.conversation_id)
            .collect()
    }

    fn friends_of(&self, user_id: UserId) -> Vec<User> {
        let shared = self.conversations_of(user_id);
        let friend_ids: HashSet<UserId> = self
            .participants
            .values()
            .filter(|participant| {
                shared.contains(&participant.conversation_id) && participant.user_id != user_id
            })
            .map(|participant| participant.user_id)
            .collect();

        friend_ids
            .into_iter()
            .filter_map(|id| self.users.get(&id).cloned())
            .collect()
    }
}

/// 内存事务句柄，持有尚未生效的写入
pub struct MemoryTransaction {
    store: MemoryStore,
    staged: Vec<Staged>,
}

impl MemoryTransaction {
    fn has_conversation(&self, tables: &Tables, id: ConversationId) -> bool {
        tables.conversations.contains_key(&id)
            || self
                .staged
                .iter()
                .any(|write| matches!(write, Staged::Conversation(c) if c.id == id))
    }

    fn user_with_subject(&self, tables: &Tables, subject: &str) -> Option<User> {
        let staged = self.staged.iter().find_map(|write| match write {
            Staged::User(user) if user.provider_subject == subject => Some(user),
            _ => None,
        });
        tables
            .users
            .values()
            .find(|user| user.provider_subject == subject)
            .or(staged)
            .cloned()
    }
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.store.check(Fault::Commit, "commit")?;
        let MemoryTransaction { store, staged } = *self;
        store.apply(staged).await;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.store.check(Fault::Rollback, "rollback")
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
impl Transactor for MemoryStore {
    async fn begin(&self) -> RepositoryResult<UnitOfWork> {
        Ok(UnitOfWork::begin(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
        })))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_ids(&self, ids: &[UserId]) -> RepositoryResult<Vec<User>> {
        self.record_read("users.find_by_ids")?;
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id).cloned())
            .collect())
    }

    async fn find_by_subject(&self, subject: &str) -> RepositoryResult<Option<User>> {
        self.record_read("users.find_by_subject")?;
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.provider_subject == subject)
            .cloned())
    }

    async fn friend_id_pages(
        &self,
        queries: &[FriendsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<UserId>>> {
        self.record_read("users.friend_id_pages")?;
        let tables = self.tables.read().await;
        Ok(queries
            .iter()
            .map(|query| {
                let friends = tables.friends_of(query.key_id);
                let page = paginate(
                    friends,
                    &query.page,
                    |user| user.name.clone(),
                    |user| Cursor::from(user.id),
                );
                (query.key_id, page.map(|user| user.id))
            })
            .collect())
    }
}

#[async_trait]
impl UserWriter for MemoryStore {
    async fn upsert_user(
        &self,
        uow: &mut UnitOfWork,
        user: NewUser,
    ) -> RepositoryResult<UserUpsert> {
        let tx = self.transaction(uow)?;
        let tables = self.tables.read().await;
        if let Some(existing) = tx.user_with_subject(&tables, &user.provider_subject) {
            return Ok(UserUpsert::Existing(existing));
        }

        let user = self.new_user(user);
        tx.staged.push(Staged::User(user.clone()));
        Ok(UserUpsert::Created(user))
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_by_ids(&self, ids: &[ConversationId]) -> RepositoryResult<Vec<Conversation>> {
        self.record_read("conversations.find_by_ids")?;
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.conversations.get(id).cloned())
            .collect())
    }

    async fn participants_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<User>>> {
        self.record_read("conversations.participants_in")?;
        let tables = self.tables.read().await;
        let wanted: HashSet<ConversationId> = ids.iter().copied().collect();

        let mut grouped: HashMap<ConversationId, Vec<User>> = HashMap::new();
        for participant in tables.participants.values() {
            if !wanted.contains(&participant.conversation_id) {
                continue;
            }
            if let Some(user) = tables.users.get(&participant.user_id) {
                grouped
                    .entry(participant.conversation_id)
                    .or_default()
                    .push(user.clone());
            }
        }
        Ok(grouped)
    }

    async fn conversation_id_pages(
        &self,
        queries: &[ConversationsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<ConversationId>>> {
        self.record_read("conversations.conversation_id_pages")?;
        let tables = self.tables.read().await;
        Ok(queries
            .iter()
            .map(|query| {
                let member_of = tables.conversations_of(query.key_id);
                let rows: Vec<Conversation> = tables
                    .conversations
                    .values()
                    .filter(|c| member_of.contains(&c.id))
                    .cloned()
                    .collect();
                let page = paginate_visible(
                    rows,
                    &query.page,
                    |c| c.updated_at,
                    |c| Cursor::from(c.id),
                    |c| c.deleted_at.is_none(),
                );
                (query.key_id, page.map(|c| c.id))
            })
            .collect())
    }
}

#[async_trait]
impl ConversationWriter for MemoryStore {
    async fn insert_conversation(
        &self,
        uow: &mut UnitOfWork,
        conversation: NewConversation,
    ) -> RepositoryResult<Conversation> {
        let tx = self.transaction(uow)?;
        self.check(Fault::InsertConversation, "insert conversation")?;

        let conversation = self.new_conversation(conversation);
        tx.staged.push(Staged::Conversation(conversation.clone()));
        Ok(conversation)
    }

    async fn insert_participants(
        &self,
        uow: &mut UnitOfWork,
        participants: &[NewParticipant],
    ) -> RepositoryResult<Vec<Participant>> {
        let tx = self.transaction(uow)?;
        self.check(Fault::InsertParticipants, "insert participants")?;

        let tables = self.tables.read().await;
        let mut inserted = Vec::with_capacity(participants.len());
        for participant in participants {
            if !tx.has_conversation(&tables, participant.conversation_id) {
                return Err(RepositoryError::storage(format!(
                    "conversation {} does not exist",
                    participant.conversation_id
                )));
            }
            inserted.push(self.new_participant(*participant));
        }

        tx.staged
            .extend(inserted.iter().cloned().map(Staged::Participant));
        Ok(inserted)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn message_pages(
        &self,
        queries: &[MessagesPageQuery],
    ) -> RepositoryResult<HashMap<ConversationId, Connection<Message>>> {
        self.record_read("messages.message_pages")?;
        let tables = self.tables.read().await;
        Ok(queries
            .iter()
            .map(|query| {
                let rows: Vec<Message> = tables
                    .messages
                    .values()
                    .filter(|m| m.conversation_id == query.key_id)
                    .cloned()
                    .collect();
                let page = paginate_visible(
                    rows,
                    &query.page,
                    |m| m.created_at,
                    |m| Cursor::from(m.id),
                    |m| m.deleted_at.is_none(),
                );
                (query.key_id, page)
            })
            .collect())
    }

    async fn messages_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<Message>>> {
        self.record_read("messages.messages_in")?;
        let tables = self.tables.read().await;
        let wanted: HashSet<ConversationId> = ids.iter().copied().collect();

        let mut grouped: HashMap<ConversationId, Vec<Message>> = HashMap::new();
        for message in tables.messages.values() {
            if wanted.contains(&message.conversation_id) && message.deleted_at.is_none() {
                grouped
                    .entry(message.conversation_id)
                    .or_default()
                    .push(message.clone());
            }
        }
        for messages in grouped.values_mut() {
            messages.sort_by_key(|m| (m.created_at, m.id));
        }
        Ok(grouped)
    }
}

#[async_trait]
impl MessageWriter for MemoryStore {
    async fn insert_message(
        &self,
        uow: &mut UnitOfWork,
        message: NewMessage,
    ) -> RepositoryResult<Message> {
        let tx = self.transaction(uow)?;
        self.check(Fault::InsertMessage, "insert message")?;

        let tables = self.tables.read().await;
        if !tx.has_conversation(&tables, message.conversation_id) {
            return Err(RepositoryError::storage(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }

        let message = self.new_message(message);
        tx.staged.push(Staged::Message(message.clone()));
        Ok(message)
    }
}
