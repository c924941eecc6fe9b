//! 后端存储抽象
//!
//! 一个以 (partition, sort) 为地址的条目存储，支持：
//! - 按键读取（可选强一致）
//! - 带条件表达式的 put / update / delete
//! - 单分区内按排序键范围分页查询，返回续读游标
//! - 批量写，返回未处理的子集
//! - 多条目事务写 / 读

mod memory;

pub use memory::{MemoryItemStore, MemoryStoreOptions};

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::expr::Expression;
use crate::item::Item;
use crate::key::ItemKey;

/// 带条件的写入
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub table: String,
    pub item: Item,
    /// 只使用其中的条件部分
    pub expression: Option<Expression>,
}

/// 更新后返回哪一份镜像
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    AllNew,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub table: String,
    pub key: ItemKey,
    pub expression: Expression,
    pub return_values: ReturnValues,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub table: String,
    pub key: ItemKey,
    pub expression: Option<Expression>,
    pub return_old: bool,
}

/// 排序键范围条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    All,
    BeginsWith(String),
    /// 闭区间
    Between(String, String),
}

impl SortCondition {
    pub fn matches(&self, sort: &str) -> bool {
        match self {
            SortCondition::All => true,
            SortCondition::BeginsWith(prefix) => sort.starts_with(prefix.as_str()),
            SortCondition::Between(low, high) => sort >= low.as_str() && sort <= high.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Select {
    #[default]
    Items,
    Count,
}

/// 不透明续读游标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(ItemKey);

impl Cursor {
    pub fn new(last_key: ItemKey) -> Self {
        Self(last_key)
    }

    pub fn last_key(&self) -> &ItemKey {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub partition: String,
    pub sort: SortCondition,
    /// 单页条目上限
    pub limit: Option<usize>,
    pub forward: bool,
    pub select: Select,
    pub consistent: bool,
    pub cursor: Option<Cursor>,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, partition: impl Into<String>, sort: SortCondition) -> Self {
        Self {
            table: table.into(),
            partition: partition.into(),
            sort,
            limit: None,
            forward: true,
            select: Select::Items,
            consistent: false,
            cursor: None,
        }
    }
}

/// 一页查询结果；`cursor` 为 None 表示已经读完
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub count: usize,
    pub cursor: Option<Cursor>,
}

/// 批量写中的单个请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Put(Item),
    Delete(ItemKey),
}

impl WriteRequest {
    pub fn key(&self) -> &ItemKey {
        match self {
            WriteRequest::Put(item) => &item.key,
            WriteRequest::Delete(key) => key,
        }
    }
}

/// 事务中的单个动作
#[derive(Debug, Clone)]
pub enum TransactAction {
    Put(PutRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    ConditionCheck {
        table: String,
        key: ItemKey,
        expression: Expression,
    },
}

impl TransactAction {
    pub fn key(&self) -> &ItemKey {
        match self {
            TransactAction::Put(req) => &req.item.key,
            TransactAction::Update(req) => &req.key,
            TransactAction::Delete(req) => &req.key,
            TransactAction::ConditionCheck { key, .. } => key,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            TransactAction::Put(req) => &req.table,
            TransactAction::Update(req) => &req.table,
            TransactAction::Delete(req) => &req.table,
            TransactAction::ConditionCheck { table, .. } => table,
        }
    }
}

/// 后端条目存储
///
/// 条件不满足时返回 `StoreError::ConditionalCheckFailed`；事务被取消或冲突时返回
/// `TransactionCanceled` / `TransactionConflict`，与其他错误可区分。
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, table: &str, key: &ItemKey, consistent: bool) -> StoreResult<Option<Item>>;

    async fn put_item(&self, req: PutRequest) -> StoreResult<()>;

    async fn update_item(&self, req: UpdateRequest) -> StoreResult<Option<Item>>;

    async fn delete_item(&self, req: DeleteRequest) -> StoreResult<Option<Item>>;

    async fn query(&self, req: QueryRequest) -> StoreResult<QueryPage>;

    /// 返回未处理的请求
    async fn batch_write(&self, table: &str, writes: Vec<WriteRequest>) -> StoreResult<Vec<WriteRequest>>;

    async fn transact_write(&self, actions: Vec<TransactAction>) -> StoreResult<()>;

    async fn transact_get(&self, table: &str, keys: &[ItemKey]) -> StoreResult<Vec<Option<Item>>>;
}
