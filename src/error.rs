use thiserror::Error;

use crate::item::Item;

/// 后端存储错误
///
/// 条件失败和事务取消是“预期内”的结果，由适配层吸收并转为布尔值；
/// 其余错误原样向上传播。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conditional check failed")]
    ConditionalCheckFailed,

    #[error("Transaction canceled: {reasons:?}")]
    TransactionCanceled { reasons: Vec<String> },

    #[error("Transaction conflict")]
    TransactionConflict,

    #[error("Throughput exceeded")]
    Throttled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Service error: {0}")]
    Service(String),
}

impl StoreError {
    /// 是否属于“什么都没改变”的一类结果（条件失败 / 事务冲突 / 事务取消）
    pub fn is_condition_outcome(&self) -> bool {
        matches!(
            self,
            StoreError::ConditionalCheckFailed
                | StoreError::TransactionCanceled { .. }
                | StoreError::TransactionConflict
        )
    }
}

/// 分页扫描中途失败：携带出错前已得到的部分结果
///
/// `collect` 的部分结果是已读取的条目，`count` 是已数到的个数，`fold` 是已折叠的累积值。
#[derive(Debug, Clone, Error)]
#[error("Scan aborted: {source}")]
pub struct ScanError<P = Vec<Item>> {
    pub partial: P,
    #[source]
    pub source: StoreError,
}

/// 适配层错误
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),

    #[error("{0}")]
    Scan(#[from] ScanError),

    #[error("{0}")]
    ScanCount(#[from] ScanError<usize>),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("increment or decrement would overflow")]
    Overflow,

    #[error("value is not a valid float")]
    NotFloat,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("Retries exhausted after {attempts} attempts ({pending} items pending)")]
    RetriesExhausted { attempts: u32, pending: usize },
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type AdapterResult<T> = Result<T, AdapterError>;
