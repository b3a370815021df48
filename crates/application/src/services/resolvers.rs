//! 图谱字段解析
//!
//! 实体只按 ID 互相引用，关联字段一律经请求级加载器解析，
//! 同一层级上的多个字段请求会被合并为一次批量读取。

use domain::{Connection, Conversation, Message, MessagesSortBy, PageQuery, PageRequest, User};

use crate::{error::ApplicationError, loader::RequestLoaders};

pub struct ConversationFields<'a> {
    loaders: &'a RequestLoaders,
    conversation: &'a Conversation,
}

impl<'a> ConversationFields<'a> {
    pub fn new(loaders: &'a RequestLoaders, conversation: &'a Conversation) -> Self {
        Self {
            loaders,
            conversation,
        }
    }

    pub async fn creator(&self) -> Result<Option<User>, ApplicationError> {
        match self.conversation.creator_id {
            Some(creator_id) => Ok(self.loaders.user(creator_id).await?),
            None => Ok(None),
        }
    }

    pub async fn participants(&self) -> Result<Vec<User>, ApplicationError> {
        Ok(self.loaders.participants(self.conversation.id).await?)
    }

    pub async fn messages(
        &self,
        page: PageRequest<MessagesSortBy>,
    ) -> Result<Connection<Message>, ApplicationError> {
        Ok(self
            .loaders
            .messages(PageQuery::new(self.conversation.id, page))
            .await?)
    }

    pub async fn all_messages(&self) -> Result<Vec<Message>, ApplicationError> {
        Ok(self.loaders.all_messages(self.conversation.id).await?)
    }
}

pub struct MessageFields<'a> {
    loaders: &'a RequestLoaders,
    message: &'a Message,
}

impl<'a> MessageFields<'a> {
    pub fn new(loaders: &'a RequestLoaders, message: &'a Message) -> Self {
        Self { loaders, message }
    }

    pub async fn sender(&self) -> Result<Option<User>, ApplicationError> {
        Ok(self.loaders.user(self.message.sender_id).await?)
    }

    pub async fn conversation(&self) -> Result<Option<Conversation>, ApplicationError> {
        Ok(self.loaders.conversation(self.message.conversation_id).await?)
    }
}
