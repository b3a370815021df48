//! 聊天图谱后端的核心领域模型
//!
//! 包含用户、会话、参与者、消息等实体，Relay 风格的分页信封，
//! 以及各层共享的错误类型。

pub mod entities;
pub mod errors;
pub mod pagination;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use pagination::*;
pub use value_objects::*;
