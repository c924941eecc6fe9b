use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;

use super::{deadline_after, expect_kind, Adapter};
use crate::atomic::Flags;
use crate::error::{AdapterError, AdapterResult};
use crate::expr::{Comparator, ExpressionBuilder};
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind};
use crate::store::ReturnValues;
use crate::value::{AttributeValue, Value};

/// SET 的可选参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// NX -> MUST_NOT_EXIST，XX -> MUST_EXIST
    pub flags: Flags,
    /// EX
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn nx() -> Self {
        Self {
            flags: Flags::MUST_NOT_EXIST,
            ttl: None,
        }
    }

    pub fn xx() -> Self {
        Self {
            flags: Flags::MUST_EXIST,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

fn string_item(key: &str, value: &Value, deadline: Option<i64>) -> Item {
    Item::new(ItemKey::scalar(key), Kind::String)
        .with_value(value)
        .with_expiry(deadline)
}

/// 同一批次中重复的键只保留最后一次赋值
fn dedup_last_wins(pairs: Vec<(String, Vec<u8>)>) -> Vec<(String, Vec<u8>)> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<(String, Vec<u8>)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        match position.get(&key) {
            Some(&i) => out[i].1 = value,
            None => {
                position.insert(key.clone(), out.len());
                out.push((key, value));
            }
        }
    }
    out
}

impl Adapter {
    // ==================== String 操作 ====================

    /// GET
    pub async fn get(&self, key: &str) -> AdapterResult<Option<Vec<u8>>> {
        let item = self.read_kind(&ItemKey::scalar(key), Kind::String).await?;
        Ok(item.and_then(|i| i.value().to_bytes()))
    }

    /// SET：无条件覆盖（清除原有 TTL）
    pub async fn set(&self, key: &str, value: Vec<u8>) -> AdapterResult<()> {
        self.set_with(key, value, SetOptions::default()).await?;
        Ok(())
    }

    /// SET [NX|XX] [EX seconds]；返回是否写入
    pub async fn set_with(&self, key: &str, value: Vec<u8>, options: SetOptions) -> AdapterResult<bool> {
        let deadline = options
            .ttl
            .map(|ttl| deadline_after(ttl.as_secs(), "set"))
            .transpose()?;
        let item = string_item(key, &Value::from_bytes(value), deadline);
        self.writer()
            .conditional_put(item, options.flags, ExpressionBuilder::new())
            .await
    }

    /// SETNX
    pub async fn setnx(&self, key: &str, value: Vec<u8>) -> AdapterResult<bool> {
        self.set_with(key, value, SetOptions::nx()).await
    }

    /// SETEX
    pub async fn setex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> AdapterResult<()> {
        let deadline = deadline_after(ttl_secs, "setex")?;
        let item = string_item(key, &Value::from_bytes(value), Some(deadline));
        self.writer()
            .conditional_put(item, Flags::NONE, ExpressionBuilder::new())
            .await?;
        Ok(())
    }

    /// GETSET：写入新值并返回旧值
    pub async fn getset(&self, key: &str, value: Vec<u8>) -> AdapterResult<Option<Vec<u8>>> {
        let mut b = ExpressionBuilder::new();
        let no_kind = b.not_exists(attr::KIND);
        let same_kind = b.compare(attr::KIND, Comparator::Eq, AttributeValue::string(Kind::String.as_str()));
        b.when_any(vec![no_kind, same_kind]);
        b.set(attr::KIND, AttributeValue::string(Kind::String.as_str()))
            .set(attr::VALUE, Value::from_bytes(value).encode())
            .remove(attr::TTL);
        let (applied, old) = self
            .writer()
            .conditional_update(ItemKey::scalar(key), Flags::NONE, b, ReturnValues::AllOld)
            .await?;
        if !applied {
            return Err(AdapterError::WrongType);
        }
        Ok(old.and_then(|i| i.value().to_bytes()))
    }

    /// MGET：一次事务读得到一致快照（超过单事务上限时分批）
    pub async fn mget(&self, keys: &[&str]) -> AdapterResult<Vec<Option<Vec<u8>>>> {
        let item_keys: Vec<ItemKey> = keys.iter().map(|k| ItemKey::scalar(k)).collect();
        let items = self.read_many(&item_keys).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                item.filter(|i| i.kind() == Some(Kind::String))
                    .and_then(|i| i.value().to_bytes())
            })
            .collect())
    }

    /// MSET：全部写入或全部不写；返回事务是否提交
    pub async fn mset(&self, pairs: Vec<(String, Vec<u8>)>) -> AdapterResult<bool> {
        self.mset_with(pairs, Flags::NONE).await
    }

    /// MSETNX：任一键已存在则全部不写
    pub async fn msetnx(&self, pairs: Vec<(String, Vec<u8>)>) -> AdapterResult<bool> {
        self.mset_with(pairs, Flags::MUST_NOT_EXIST).await
    }

    async fn mset_with(&self, pairs: Vec<(String, Vec<u8>)>, flags: Flags) -> AdapterResult<bool> {
        let mut group = self.transaction();
        for (key, value) in dedup_last_wins(pairs) {
            group.put(
                string_item(&key, &Value::from_bytes(value), None),
                flags,
                ExpressionBuilder::new(),
            );
        }
        group.commit().await
    }

    /// INCR
    pub async fn incr(&self, key: &str) -> AdapterResult<i64> {
        self.incrby(key, 1).await
    }

    /// INCRBY：单次条件 ADD；值不是整数或结果溢出时报错且原值不变
    pub async fn incrby(&self, key: &str, delta: i64) -> AdapterResult<i64> {
        self.add_to_integer(ItemKey::scalar(key), Kind::String, delta, None)
            .await
    }

    /// DECR
    pub async fn decr(&self, key: &str) -> AdapterResult<i64> {
        self.incrby(key, -1).await
    }

    /// DECRBY
    pub async fn decrby(&self, key: &str, delta: i64) -> AdapterResult<i64> {
        let delta = delta.checked_neg().ok_or(AdapterError::Overflow)?;
        self.incrby(key, delta).await
    }

    /// INCRBYFLOAT：乐观读-改-写
    pub async fn incrbyfloat(&self, key: &str, delta: Decimal) -> AdapterResult<Decimal> {
        let updated = self
            .swap_scalar(key, |current| {
                let base = match current {
                    Value::Absent => Decimal::ZERO,
                    v => v.to_decimal().ok_or(AdapterError::NotFloat)?,
                };
                let sum = base.checked_add(delta).ok_or(AdapterError::NotFloat)?.normalize();
                // 保持整数可被 INCR 继续累加
                Ok(if sum.scale() == 0 {
                    Value::Numeric(sum)
                } else {
                    Value::Text(sum.to_string())
                })
            })
            .await?;
        updated.to_decimal().ok_or(AdapterError::NotFloat)
    }

    /// APPEND：返回追加后的长度
    pub async fn append(&self, key: &str, suffix: &[u8]) -> AdapterResult<usize> {
        let updated = self
            .swap_scalar(key, |current| {
                let mut bytes = current.to_bytes().unwrap_or_default();
                bytes.extend_from_slice(suffix);
                Ok(Value::from_bytes(bytes))
            })
            .await?;
        Ok(updated.to_bytes().map_or(0, |b| b.len()))
    }

    /// STRLEN
    pub async fn strlen(&self, key: &str) -> AdapterResult<usize> {
        Ok(self.get(key).await?.map_or(0, |v| v.len()))
    }

    /// 以旧值为条件替换字符串值，冲突时重读重试（有上限）；保留 TTL
    async fn swap_scalar<F>(&self, key: &str, f: F) -> AdapterResult<Value>
    where
        F: Fn(&Value) -> AdapterResult<Value>,
    {
        let item_key = ItemKey::scalar(key);
        let writer = self.writer();
        for _ in 0..=self.options.optimistic_retries {
            match self.read(&item_key).await? {
                None => {
                    let next = f(&Value::Absent)?;
                    let item = string_item(key, &next, None);
                    if writer
                        .conditional_put(item, Flags::MUST_NOT_EXIST, ExpressionBuilder::new())
                        .await?
                    {
                        return Ok(next);
                    }
                }
                Some(item) => {
                    expect_kind(&item, Kind::String)?;
                    let old = item.value();
                    let next = f(&old)?;
                    let mut b = ExpressionBuilder::new();
                    let unchanged = b.compare(attr::VALUE, Comparator::Eq, old.encode());
                    b.when(unchanged).set(attr::VALUE, next.encode());
                    let (applied, _) = writer
                        .conditional_update(item_key.clone(), Flags::MUST_EXIST, b, ReturnValues::None)
                        .await?;
                    if applied {
                        return Ok(next);
                    }
                }
            }
        }
        Err(self.retries_exhausted(self.options.optimistic_retries + 1))
    }
}
