use std::collections::BTreeMap;

use super::{expect_kind, Adapter};
use crate::atomic::Flags;
use crate::error::AdapterResult;
use crate::expr::ExpressionBuilder;
use crate::item::Item;
use crate::key::{ItemKey, Kind, Tag};
use crate::store::{SortCondition, WriteRequest};
use crate::value::Value;

fn field_key(key: &str, field: &str) -> ItemKey {
    ItemKey::tagged(key, Tag::Field, field)
}

fn field_item(key: &str, field: &str, value: Vec<u8>, deadline: Option<i64>) -> Item {
    Item::new(field_key(key, field), Kind::Hash)
        .with_value(&Value::from_bytes(value))
        .with_expiry(deadline)
}

/// (字段名, 值)；标签不符或值缺失的条目被跳过
fn field_pair(item: Item) -> Option<(String, Vec<u8>)> {
    let field = item.key.member(Tag::Field)?.to_string();
    Some((field, item.value().to_bytes()?))
}

impl Adapter {
    // ==================== Hash 操作 ====================

    /// HSET：返回新增字段数
    ///
    /// 先事务读出哪些字段已存在，再批量写入；并发写同一字段时计数是尽力而为。
    pub async fn hset(&self, key: &str, pairs: Vec<(String, Vec<u8>)>) -> AdapterResult<usize> {
        let fields: BTreeMap<String, Vec<u8>> = pairs.into_iter().collect();
        let keys: Vec<ItemKey> = fields.keys().map(|f| field_key(key, f)).collect();

        let mut created = 0;
        for existing in self.read_many(&keys).await? {
            match existing {
                Some(item) => expect_kind(&item, Kind::Hash)?,
                None => created += 1,
            }
        }

        let deadline = self.key_deadline(key).await?;
        let writes = fields
            .into_iter()
            .map(|(field, value)| WriteRequest::Put(field_item(key, &field, value, deadline)))
            .collect();
        self.batch().write_all(writes).await?;
        Ok(created)
    }

    /// HSETNX
    pub async fn hsetnx(&self, key: &str, field: &str, value: Vec<u8>) -> AdapterResult<bool> {
        let item = field_item(key, field, value, self.key_deadline(key).await?);
        self.writer()
            .conditional_put(item, Flags::MUST_NOT_EXIST, ExpressionBuilder::new())
            .await
    }

    /// HGET
    pub async fn hget(&self, key: &str, field: &str) -> AdapterResult<Option<Vec<u8>>> {
        let item = self.read_kind(&field_key(key, field), Kind::Hash).await?;
        Ok(item.and_then(|i| i.value().to_bytes()))
    }

    /// HMGET
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> AdapterResult<Vec<Option<Vec<u8>>>> {
        let keys: Vec<ItemKey> = fields.iter().map(|f| field_key(key, f)).collect();
        let mut values = Vec::with_capacity(keys.len());
        for item in self.read_many(&keys).await? {
            values.push(match item {
                Some(item) => {
                    expect_kind(&item, Kind::Hash)?;
                    item.value().to_bytes()
                }
                None => None,
            });
        }
        Ok(values)
    }

    /// HDEL：逐个条件删除，返回实际删除的字段数
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> AdapterResult<usize> {
        let writer = self.writer();
        let mut removed = 0;
        for field in fields {
            let (applied, _) = writer
                .conditional_delete(field_key(key, field), Flags::MUST_EXIST, ExpressionBuilder::new())
                .await?;
            if applied {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// HEXISTS
    pub async fn hexists(&self, key: &str, field: &str) -> AdapterResult<bool> {
        Ok(self.read_kind(&field_key(key, field), Kind::Hash).await?.is_some())
    }

    /// HGETALL：按字段名排序
    pub async fn hgetall(&self, key: &str) -> AdapterResult<Vec<(String, Vec<u8>)>> {
        let items = self.scan_fields(key).collect().await?;
        Ok(items.into_iter().filter_map(field_pair).collect())
    }

    /// HKEYS
    pub async fn hkeys(&self, key: &str) -> AdapterResult<Vec<String>> {
        let items = self.scan_fields(key).collect().await?;
        Ok(items
            .iter()
            .filter_map(|item| item.key.member(Tag::Field).map(str::to_string))
            .collect())
    }

    /// HVALS
    pub async fn hvals(&self, key: &str) -> AdapterResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key).await?.into_iter().map(|(_, v)| v).collect())
    }

    /// HLEN
    pub async fn hlen(&self, key: &str) -> AdapterResult<usize> {
        Ok(self.scan_fields(key).count().await?)
    }

    /// HINCRBY
    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> AdapterResult<i64> {
        let deadline = self.key_deadline(key).await?;
        self.add_to_integer(field_key(key, field), Kind::Hash, delta, deadline)
            .await
    }

    fn scan_fields(&self, key: &str) -> crate::scan::PaginatedScan {
        self.scan(key, SortCondition::BeginsWith(Tag::Field.prefix().to_string()))
    }
}
