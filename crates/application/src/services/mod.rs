mod message_service;
mod resolvers;
mod user_service;

pub use message_service::{
    CreateConversationInput, CreatedConversation, MessageService, MessageServiceDependencies,
    PostMessageInput,
};
pub use resolvers::{ConversationFields, MessageFields};
pub use user_service::{UserService, UserServiceDependencies};
