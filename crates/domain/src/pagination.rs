//! Relay 风格的分页信封与键集分页参数
//!
//! 排序列只能来自每种实体固定的白名单，并始终以行 ID 升序作为次级排序键。
//! 游标就是行主键本身。

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::Cursor;

/// 单页最大条数
pub const MAX_PAGE_SIZE: u32 = 100;

/// 排序键白名单
pub trait SortKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// 该实体允许的全部排序键
    const ALLOWED: &'static [Self];

    /// 对外暴露的枚举名
    fn as_str(&self) -> &'static str;

    /// 对应的数据库列名
    fn column(&self) -> &'static str;

    fn parse(raw: &str) -> DomainResult<Self> {
        Self::ALLOWED
            .iter()
            .copied()
            .find(|key| key.as_str() == raw)
            .ok_or_else(|| {
                DomainError::validation_error("sortBy", format!("不支持的排序字段: {raw}"))
            })
    }
}

/// 消息排序键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagesSortBy {
    #[default]
    CreatedAt,
}

impl SortKey for MessagesSortBy {
    const ALLOWED: &'static [Self] = &[Self::CreatedAt];

    fn as_str(&self) -> &'static str {
        "MESSAGES_SORT_BY_CREATED_AT"
    }

    fn column(&self) -> &'static str {
        "created_at"
    }
}

/// 会话排序键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationsSortBy {
    #[default]
    UpdatedAt,
}

impl SortKey for ConversationsSortBy {
    const ALLOWED: &'static [Self] = &[Self::UpdatedAt];

    fn as_str(&self) -> &'static str {
        "CONVERSATIONS_SORT_BY_UPDATED_AT"
    }

    fn column(&self) -> &'static str {
        "updated_at"
    }
}

/// 好友排序键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FriendsSortBy {
    #[default]
    Name,
}

impl SortKey for FriendsSortBy {
    const ALLOWED: &'static [Self] = &[Self::Name];

    fn as_str(&self) -> &'static str {
        "FRIENDS_SORT_BY_NAME"
    }

    fn column(&self) -> &'static str {
        "name"
    }
}

/// 排序方向
///
/// 会被解析并随分页参数传递，但分页始终按升序进行。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "SORT_ORDER_ASC",
            Self::Desc => "SORT_ORDER_DES",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "SORT_ORDER_ASC" => Ok(Self::Asc),
            "SORT_ORDER_DES" => Ok(Self::Desc),
            other => Err(DomainError::validation_error(
                "sortOrder",
                format!("不支持的排序方向: {other}"),
            )),
        }
    }
}

/// 已校验的前向分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest<S: SortKey> {
    pub first: u32,
    pub after: Option<Cursor>,
    pub sort_by: S,
    pub sort_order: SortOrder,
}

impl<S: SortKey> PageRequest<S> {
    pub fn new(first: i64, after: Option<Cursor>, sort_by: S) -> DomainResult<Self> {
        let first = u32::try_from(first)
            .ok()
            .filter(|first| (1..=MAX_PAGE_SIZE).contains(first))
            .ok_or_else(|| {
                DomainError::validation_error(
                    "first",
                    format!("分页大小必须在1到{MAX_PAGE_SIZE}之间"),
                )
            })?;

        Ok(Self {
            first,
            after,
            sort_by,
            sort_order: SortOrder::Asc,
        })
    }

    /// 从原始输入构造，`after` 为 0 表示没有游标
    pub fn parse(
        first: i64,
        after: i64,
        sort_by: &str,
        sort_order: Option<&str>,
    ) -> DomainResult<Self> {
        let sort_by = S::parse(sort_by)?;
        let sort_order = sort_order
            .map(SortOrder::parse)
            .transpose()?
            .unwrap_or_default();

        Ok(Self::new(first, Cursor::from_raw(after), sort_by)?.with_order(sort_order))
    }

    pub fn with_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// 多取一行用来判断是否还有下一页
    pub fn fetch_limit(&self) -> i64 {
        i64::from(self.first) + 1
    }

    pub fn page_size(&self) -> usize {
        self.first as usize
    }
}

/// 以父实体 ID 为批量键的分页描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageQuery<K, S: SortKey> {
    pub key_id: K,
    pub page: PageRequest<S>,
}

impl<K, S: SortKey> PageQuery<K, S> {
    pub fn new(key_id: K, page: PageRequest<S>) -> Self {
        Self { key_id, page }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: Cursor,
    pub node: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

/// 分页结果
///
/// `total_count` 是本页的边数，不是完整结果集的大小。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub total_count: usize,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Connection<T> {
    pub fn empty() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
            total_count: 0,
        }
    }

    /// 由按 `first + 1` 上限取出的行组装一页
    pub fn from_rows(
        mut rows: Vec<T>,
        first: usize,
        has_previous_page: bool,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Self {
        let has_next_page = rows.len() > first;
        rows.truncate(first);

        let edges: Vec<Edge<T>> = rows
            .into_iter()
            .map(|node| Edge {
                cursor: cursor_of(&node),
                node,
            })
            .collect();

        Self::from_edges(edges, has_previous_page, has_next_page)
    }

    fn from_edges(edges: Vec<Edge<T>>, has_previous_page: bool, has_next_page: bool) -> Self {
        let page_info = PageInfo {
            start_cursor: edges.first().map(|edge| edge.cursor),
            end_cursor: edges.last().map(|edge| edge.cursor),
            has_previous_page,
            has_next_page,
        };

        Self {
            total_count: edges.len(),
            edges,
            page_info,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            edges: self
                .edges
                .into_iter()
                .map(|edge| Edge {
                    cursor: edge.cursor,
                    node: f(edge.node),
                })
                .collect(),
            page_info: self.page_info,
            total_count: self.total_count,
        }
    }

    /// 替换节点，丢弃无法解析的边；游标和翻页标记保持不变
    pub fn filter_map<U>(self, mut f: impl FnMut(T) -> Option<U>) -> Connection<U> {
        let edges: Vec<Edge<U>> = self
            .edges
            .into_iter()
            .filter_map(|edge| {
                f(edge.node).map(|node| Edge {
                    cursor: edge.cursor,
                    node,
                })
            })
            .collect();

        Connection {
            total_count: edges.len(),
            edges,
            page_info: self.page_info,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|edge| &edge.node)
    }

    pub fn into_nodes(self) -> Vec<T> {
        self.edges.into_iter().map(|edge| edge.node).collect()
    }
}

/// 内存中的键集分页，语义与数据库实现一致
///
/// 行按 `(排序值, 游标)` 升序排列。游标指向的行不存在时返回空页。
pub fn paginate<T, S, V>(
    rows: Vec<T>,
    request: &PageRequest<S>,
    sort_value: impl Fn(&T) -> V,
    cursor_of: impl Fn(&T) -> Cursor,
) -> Connection<T>
where
    S: SortKey,
    V: Ord,
{
    paginate_visible(rows, request, sort_value, cursor_of, |_| true)
}

/// 带可见性条件的键集分页
///
/// `rows` 包含已软删除的行：游标在全部行中定位，页内只输出可见行。
/// 游标行被软删除后，从它之后继续翻页。
pub fn paginate_visible<T, S, V>(
    mut rows: Vec<T>,
    request: &PageRequest<S>,
    sort_value: impl Fn(&T) -> V,
    cursor_of: impl Fn(&T) -> Cursor,
    is_visible: impl Fn(&T) -> bool,
) -> Connection<T>
where
    S: SortKey,
    V: Ord,
{
    rows.sort_by(|a, b| {
        sort_value(a)
            .cmp(&sort_value(b))
            .then_with(|| cursor_of(a).cmp(&cursor_of(b)))
    });

    let (has_previous_page, start) = match request.after {
        None => (false, 0),
        Some(after) => match rows.iter().position(|row| cursor_of(row) == after) {
            Some(position) => (rows[..position].iter().any(&is_visible), position + 1),
            None => return Connection::empty(),
        },
    };

    let window: Vec<T> = rows
        .into_iter()
        .skip(start)
        .filter(|row| is_visible(row))
        .take(request.page_size() + 1)
        .collect();

    Connection::from_rows(window, request.page_size(), has_previous_page, cursor_of)
}
