//! Redis 命令适配层
//!
//! 每种数据结构一个文件，全部实现为 `Adapter` 的方法：
//! - String: GET, SET, SETNX, SETEX, GETSET, MGET, MSET, MSETNX, INCR, INCRBY, DECR, DECRBY,
//!   INCRBYFLOAT, APPEND, STRLEN
//! - Hash: HSET, HSETNX, HGET, HMGET, HDEL, HEXISTS, HGETALL, HKEYS, HVALS, HLEN, HINCRBY
//! - Set: SADD, SREM, SISMEMBER, SMEMBERS, SCARD
//! - Sorted Set: ZADD, ZSCORE, ZINCRBY, ZREM, ZCARD, ZRANGEBYSCORE
//! - List: LPUSH, RPUSH, LLEN, LRANGE, LINDEX
//! - Stream: XADD, XRANGE, XLEN
//! - 通用: DEL, EXISTS, EXPIRE, TTL, PERSIST
//!
//! 适配层本身无状态，只持有共享的后端句柄，可以在多个任务间自由克隆。

mod hashes;
mod keys;
mod lists;
mod sets;
mod streams;
mod strings;
mod zsets;

pub use streams::StreamEntry;
pub use strings::SetOptions;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

use crate::atomic::{AtomicWriter, Flags};
use crate::batch::BatchWriter;
use crate::error::{AdapterError, AdapterResult};
use crate::expr::{Comparator, ExpressionBuilder};
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind, Sentinel};
use crate::options::AdapterOptions;
use crate::scan::PaginatedScan;
use crate::store::{ItemStore, QueryRequest, ReturnValues, SortCondition, WriteRequest};
use crate::transaction::{TransactionalGroup, MAX_TRANSACTION_ACTIONS};
use crate::value::{AttributeType, AttributeValue};

#[derive(Clone)]
pub struct Adapter {
    store: Arc<dyn ItemStore>,
    options: AdapterOptions,
}

impl Adapter {
    pub fn new(store: Arc<dyn ItemStore>, options: AdapterOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub fn writer(&self) -> AtomicWriter {
        AtomicWriter::new(self.store.clone(), self.options.table_name.clone())
    }

    pub fn transaction(&self) -> TransactionalGroup {
        TransactionalGroup::new(self.store.clone(), self.options.table_name.clone())
    }

    pub fn batch(&self) -> BatchWriter {
        BatchWriter::new(self.store.clone(), self.options.table_name.clone())
            .with_chunk_size(self.options.batch_chunk_size)
            .with_max_attempts(self.options.batch_max_attempts)
            .with_backoff(Duration::from_millis(self.options.batch_backoff_ms))
    }

    pub fn scan(&self, partition: &str, sort: SortCondition) -> PaginatedScan {
        let mut request = QueryRequest::new(self.options.table_name.clone(), partition, sort);
        request.consistent = self.options.consistent_reads;
        PaginatedScan::new(self.store.clone(), request).with_page_size(self.options.page_size)
    }

    /// 读取单个条目
    async fn read(&self, key: &ItemKey) -> AdapterResult<Option<Item>> {
        Ok(self
            .store
            .get_item(&self.options.table_name, key, self.options.consistent_reads)
            .await?)
    }

    /// 读取单个条目并校验种类
    async fn read_kind(&self, key: &ItemKey, kind: Kind) -> AdapterResult<Option<Item>> {
        let item = self.read(key).await?;
        if let Some(item) = &item {
            expect_kind(item, kind)?;
        }
        Ok(item)
    }

    /// 事务读，按后端上限分批；结果与 `keys` 一一对应
    async fn read_many(&self, keys: &[ItemKey]) -> AdapterResult<Vec<Option<Item>>> {
        let mut items = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_TRANSACTION_ACTIONS) {
            items.extend(self.store.transact_get(&self.options.table_name, chunk).await?);
        }
        Ok(items)
    }

    /// 对整数属性做原子 ADD；属性不存在时从 0 开始
    ///
    /// 值不是数值、种类不符或结果会超出 i64 时条件失败，原值不变。
    async fn add_to_integer(
        &self,
        key: ItemKey,
        kind: Kind,
        delta: i64,
        deadline: Option<i64>,
    ) -> AdapterResult<i64> {
        let mut b = ExpressionBuilder::new();
        let absent = b.not_exists(attr::VALUE);
        let numeric = b.has_type(attr::VALUE, AttributeType::Number);
        b.when_any(vec![absent, numeric]);
        let no_kind = b.not_exists(attr::KIND);
        let same_kind = b.compare(attr::KIND, Comparator::Eq, AttributeValue::string(kind.as_str()));
        b.when_any(vec![no_kind, same_kind]);
        let absent = b.not_exists(attr::VALUE);
        let in_range = if delta < 0 {
            b.compare(attr::VALUE, Comparator::Ge, AttributeValue::number(i64::MIN - delta))
        } else {
            b.compare(attr::VALUE, Comparator::Le, AttributeValue::number(i64::MAX - delta))
        };
        b.when_any(vec![absent, in_range]);
        b.set(attr::KIND, AttributeValue::string(kind.as_str()))
            .add(attr::VALUE, AttributeValue::number(delta));
        if let Some(deadline) = deadline {
            b.set(attr::TTL, AttributeValue::number(deadline));
        }

        let (applied, image) = self
            .writer()
            .conditional_update(key.clone(), Flags::NONE, b, ReturnValues::AllNew)
            .await?;
        if !applied {
            // 区分类型错误、溢出和非数值
            let Some(item) = self.read(&key).await? else {
                return Err(AdapterError::NotInteger);
            };
            expect_kind(&item, kind)?;
            return Err(match item.attribute(attr::VALUE).map(AttributeValue::type_tag) {
                Some(AttributeType::Number) => AdapterError::Overflow,
                _ => AdapterError::NotInteger,
            });
        }
        image
            .and_then(|item| item.value().to_decimal())
            .and_then(|n| n.to_i64())
            .ok_or(AdapterError::NotInteger)
    }

    /// 键级截止时间
    ///
    /// EXPIRE 作用于集合类键时把截止时间写在 `@ttl` 哨兵上；之后的集合写入
    /// 给新建或替换的条目打上同一截止时间，整个键一起过期。
    async fn key_deadline(&self, key: &str) -> AdapterResult<Option<i64>> {
        let sentinel = self.read(&ItemKey::sentinel(key, Sentinel::Ttl)).await?;
        Ok(sentinel.as_ref().and_then(Item::expires_at))
    }

    /// 把一组条目全部删除
    async fn delete_items(&self, keys: Vec<ItemKey>) -> AdapterResult<usize> {
        let writes = keys.into_iter().map(WriteRequest::Delete).collect();
        Ok(self.batch().write_all(writes).await?.written)
    }

    fn retries_exhausted(&self, attempts: u32) -> AdapterError {
        warn!("optimistic write gave up after {} attempts", attempts);
        AdapterError::RetriesExhausted { attempts, pending: 1 }
    }
}

pub(crate) fn expect_kind(item: &Item, kind: Kind) -> AdapterResult<()> {
    match item.kind() {
        Some(k) if k == kind => Ok(()),
        _ => Err(AdapterError::WrongType),
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn now_secs() -> i64 {
    (now_ms() / 1000) as i64
}

/// 当前时间加 `secs` 秒；为 0 或超出范围时报错
pub(crate) fn deadline_after(secs: u64, command: &str) -> AdapterResult<i64> {
    i64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| now_secs().checked_add(secs))
        .ok_or_else(|| AdapterError::InvalidArgument(format!("invalid expire time in '{}' command", command)))
}

/// 按 Redis 语义把 [start, stop]（可为负）解析成 [0, len) 内的闭区间
pub(crate) fn resolve_range(start: i64, stop: i64, len: i64) -> Option<(i64, i64)> {
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    (start <= stop && start < len).then_some((start, stop))
}
