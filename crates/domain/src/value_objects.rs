use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = chrono::DateTime<chrono::Utc>;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<$name> for Cursor {
            fn from(value: $name) -> Self {
                Cursor(value.0)
            }
        }

        impl From<Cursor> for $name {
            fn from(value: Cursor) -> Self {
                Self(value.0)
            }
        }
    };
}

entity_id!(
    /// 用户唯一标识。
    UserId
);
entity_id!(
    /// 会话唯一标识。
    ConversationId
);
entity_id!(
    /// 参与者（会话成员关系）唯一标识。
    ParticipantId
);
entity_id!(
    /// 消息唯一标识。
    MessageId
);

/// 分页游标，即底层行的主键，不做任何编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    /// 零值表示“没有游标”，即从结果集开头开始。
    pub fn from_raw(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| DomainError::validation_error("after", format!("invalid cursor {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cursor_means_start_of_set() {
        assert_eq!(Cursor::from_raw(0), None);
        assert_eq!(Cursor::from_raw(42), Some(Cursor(42)));
    }

    #[test]
    fn cursor_is_the_raw_row_id() {
        let cursor = Cursor::from(MessageId::new(17));
        assert_eq!(cursor.to_string(), "17");
        assert_eq!(MessageId::from(cursor), MessageId::new(17));
        assert_eq!("17".parse::<Cursor>().unwrap(), cursor);
        assert!("abc".parse::<Cursor>().is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&UserId::new(5)).unwrap();
        assert_eq!(json, "5");
    }
}
