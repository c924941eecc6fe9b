//! 基于分区/排序键条目存储的 Redis 数据结构适配层
//!
//! 把 Redis 的字符串、哈希、集合、有序集合、列表和流映射到一个按
//! `(partition, sort)` 寻址的托管条目存储上：
//!
//! - 一个 Redis 键对应一个分区，集合中的字段/成员对应分区内的排序键；
//! - 单条目变更通过后端的条件写实现原子性，多条目变更通过事务实现全有或全无；
//! - 大集合的读取通过分页扫描完成，批量写只重发后端未处理的部分。
//!
//! 适配层本身不持有任何锁或缓存，所有并发控制都交给后端。
//!
//! ```ignore
//! let store = Arc::new(MemoryItemStore::new());
//! let redis = Adapter::new(store, AdapterOptions::default());
//! redis.set("hello", b"world".to_vec()).await?;
//! ```

pub mod adapter;
pub mod atomic;
pub mod batch;
pub mod error;
pub mod expr;
pub mod item;
pub mod key;
pub mod options;
pub mod scan;
pub mod score;
pub mod store;
pub mod transaction;
pub mod value;

pub use adapter::{Adapter, SetOptions, StreamEntry};
pub use atomic::{AtomicWriter, Flags};
pub use batch::{BatchOutcome, BatchWriter};
pub use error::{AdapterError, AdapterResult, ScanError, StoreError, StoreResult};
pub use expr::{Expression, ExpressionBuilder};
pub use item::{Attributes, Item};
pub use key::{ItemKey, Kind};
pub use options::AdapterOptions;
pub use scan::PaginatedScan;
pub use score::StreamId;
pub use store::{ItemStore, MemoryItemStore, MemoryStoreOptions};
pub use transaction::TransactionalGroup;
pub use value::{AttributeValue, Value};
