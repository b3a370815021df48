use std::sync::Arc;

use domain::{
    Connection, Conversation, ConversationId, ConversationType, ConversationsSortBy, Message,
    MessagesSortBy, NewConversation, NewMessage, NewParticipant, PageQuery, PageRequest,
    Participant, UserId,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    error::ApplicationError,
    loader::RequestLoaders,
    registry::{FeedTopic, MessageFeed, Subscription},
    repository::{ConversationWriter, MessageWriter},
    transaction::{complete, Transactor, UnitOfWork},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageInput {
    pub conversation_id: ConversationId,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationInput {
    #[validate(length(min = 1, message = "至少需要一个接收方"))]
    pub recipients: Vec<UserId>,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub title: String,
    /// 可选的首条消息
    #[serde(default)]
    pub text: Option<String>,
}

/// 新建会话的全部写入结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedConversation {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
    pub message: Option<Message>,
}

pub struct MessageServiceDependencies {
    pub conversation_writer: Arc<dyn ConversationWriter>,
    pub message_writer: Arc<dyn MessageWriter>,
    pub transactor: Arc<dyn Transactor>,
    pub feed: MessageFeed,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// 发送消息，提交后广播给所有消息订阅者
    pub async fn post_message(
        &self,
        sender_id: UserId,
        input: PostMessageInput,
    ) -> Result<Message, ApplicationError> {
        let new_message = NewMessage::text(input.conversation_id, sender_id, input.text)?;

        let mut uow = self.deps.transactor.begin().await?;
        let inserted = self
            .deps
            .message_writer
            .insert_message(&mut uow, new_message)
            .await
            .map_err(ApplicationError::from);
        let message = complete(&mut uow, inserted).await?;

        tracing::debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            "消息已发送"
        );

        self.deps
            .feed
            .broadcast(&FeedTopic::MessagePosted, message.clone())
            .await;

        Ok(message)
    }

    /// 在同一个工作单元内创建会话、参与者和可选的首条消息
    ///
    /// 只有接收方成为参与者，创建者不会被自动加入。
    pub async fn create_new_conversation(
        &self,
        creator_id: UserId,
        input: CreateConversationInput,
    ) -> Result<CreatedConversation, ApplicationError> {
        input.validate()?;

        // 先校验首条消息，避免开启事务后才发现输入无效
        let seed = input.text.filter(|text| !text.is_empty());
        if let Some(text) = &seed {
            NewMessage::validate_content(text)?;
        }

        let new_conversation = NewConversation {
            creator_id: Some(creator_id),
            title: input.title,
            conversation_type: ConversationType::for_recipients(input.recipients.len()),
        };

        let mut uow = self.deps.transactor.begin().await?;
        let written = self
            .write_conversation(&mut uow, creator_id, new_conversation, &input.recipients, seed)
            .await;
        let created = complete(&mut uow, written).await?;

        tracing::info!(
            conversation_id = %created.conversation.id,
            conversation_type = %created.conversation.conversation_type,
            participants = created.participants.len(),
            "会话已创建"
        );

        if let Some(message) = &created.message {
            self.deps
                .feed
                .broadcast(&FeedTopic::MessagePosted, message.clone())
                .await;
        }

        Ok(created)
    }

    async fn write_conversation(
        &self,
        uow: &mut UnitOfWork,
        creator_id: UserId,
        new_conversation: NewConversation,
        recipients: &[UserId],
        seed: Option<String>,
    ) -> Result<CreatedConversation, ApplicationError> {
        let conversation = self
            .deps
            .conversation_writer
            .insert_conversation(uow, new_conversation)
            .await?;

        let members: Vec<NewParticipant> = recipients
            .iter()
            .map(|user_id| NewParticipant {
                conversation_id: conversation.id,
                user_id: *user_id,
            })
            .collect();
        let participants = self
            .deps
            .conversation_writer
            .insert_participants(uow, &members)
            .await?;

        let message = match seed {
            Some(text) => {
                let seed = NewMessage::text(conversation.id, creator_id, text)?;
                Some(self.deps.message_writer.insert_message(uow, seed).await?)
            }
            None => None,
        };

        Ok(CreatedConversation {
            conversation,
            participants,
            message,
        })
    }

    pub async fn message_posted(
        &self,
        subscriber: impl Into<String>,
        scope: &CancellationToken,
    ) -> Subscription<Message> {
        self.deps
            .feed
            .subscribe(FeedTopic::MessagePosted, subscriber, scope)
            .await
    }

    pub async fn messages(
        &self,
        loaders: &RequestLoaders,
        conversation_id: ConversationId,
        page: PageRequest<MessagesSortBy>,
    ) -> Result<Connection<Message>, ApplicationError> {
        Ok(loaders
            .messages(PageQuery::new(conversation_id, page))
            .await?)
    }

    /// 用户参与的会话：先分页取会话 ID，再经会话加载器合并读取
    pub async fn conversations(
        &self,
        loaders: &RequestLoaders,
        user_id: UserId,
        page: PageRequest<ConversationsSortBy>,
    ) -> Result<Connection<Conversation>, ApplicationError> {
        let ids = loaders
            .conversation_ids(PageQuery::new(user_id, page))
            .await?;

        let loaded = futures::future::join_all(ids.nodes().map(|id| loaders.conversation(*id))).await;
        let mut by_id = std::collections::HashMap::with_capacity(loaded.len());
        for conversation in loaded {
            if let Some(conversation) = conversation? {
                by_id.insert(conversation.id, conversation);
            }
        }

        Ok(ids.filter_map(|id| by_id.remove(&id)))
    }
}
