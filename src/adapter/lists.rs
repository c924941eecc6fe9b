use rust_decimal::prelude::ToPrimitive;

use super::{resolve_range, Adapter};
use crate::atomic::Flags;
use crate::error::AdapterResult;
use crate::expr::{Comparator, ExpressionBuilder};
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind, Sentinel, Tag};
use crate::score::encode_index;
use crate::store::SortCondition;
use crate::transaction::MAX_TRANSACTION_ACTIONS;
use crate::value::{AttributeValue, Value};

/// 每个事务除计数器外最多写入的元素数
const PUSH_CHUNK: usize = MAX_TRANSACTION_ACTIONS - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

/// 计数器：元素下标占据 [head, tail)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Bounds {
    head: i64,
    tail: i64,
}

impl Bounds {
    fn from_item(item: &Item) -> Bounds {
        let read = |name: &str| {
            item.attribute(name)
                .and_then(AttributeValue::as_decimal)
                .and_then(|d| d.to_i64())
                .unwrap_or(0)
        };
        Bounds {
            head: read(attr::HEAD),
            tail: read(attr::TAIL),
        }
    }

    fn len(&self) -> i64 {
        self.tail - self.head
    }
}

fn meta_key(key: &str) -> ItemKey {
    ItemKey::sentinel(key, Sentinel::List)
}

fn element_key(key: &str, index: i64) -> ItemKey {
    ItemKey::tagged(key, Tag::ListElem, &encode_index(index))
}

impl Adapter {
    // ==================== List 操作 ====================

    /// LPUSH：依次压入表头，返回新长度
    pub async fn lpush(&self, key: &str, values: Vec<Vec<u8>>) -> AdapterResult<usize> {
        self.push(key, values, End::Head).await
    }

    /// RPUSH：依次追加到表尾，返回新长度
    pub async fn rpush(&self, key: &str, values: Vec<Vec<u8>>) -> AdapterResult<usize> {
        self.push(key, values, End::Tail).await
    }

    /// LLEN
    pub async fn llen(&self, key: &str) -> AdapterResult<usize> {
        Ok(self.list_bounds(key).await?.len() as usize)
    }

    /// LRANGE：闭区间，支持负下标
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> AdapterResult<Vec<Vec<u8>>> {
        let bounds = self.list_bounds(key).await?;
        let Some((start, stop)) = resolve_range(start, stop, bounds.len()) else {
            return Ok(Vec::new());
        };
        let lower = element_key(key, bounds.head + start).sort;
        let upper = element_key(key, bounds.head + stop).sort;
        let items = self.scan(key, SortCondition::Between(lower, upper)).collect().await?;
        Ok(items.iter().filter_map(|item| item.value().to_bytes()).collect())
    }

    /// LINDEX
    pub async fn lindex(&self, key: &str, index: i64) -> AdapterResult<Option<Vec<u8>>> {
        let bounds = self.list_bounds(key).await?;
        let Some((index, _)) = resolve_range(index, index, bounds.len()) else {
            return Ok(None);
        };
        let item = self.read_kind(&element_key(key, bounds.head + index), Kind::List).await?;
        Ok(item.and_then(|i| i.value().to_bytes()))
    }

    async fn list_bounds(&self, key: &str) -> AdapterResult<Bounds> {
        let meta = self.read_kind(&meta_key(key), Kind::List).await?;
        Ok(meta.as_ref().map(Bounds::from_item).unwrap_or_default())
    }

    /// 每块一个事务：计数器以旧值为条件前移，同时写入该块元素
    async fn push(&self, key: &str, values: Vec<Vec<u8>>, end: End) -> AdapterResult<usize> {
        let mut len = self.list_bounds(key).await?.len();
        let deadline = self.key_deadline(key).await?;
        for chunk in values.chunks(PUSH_CHUNK) {
            len = self.push_chunk(key, chunk, end, deadline).await?;
        }
        Ok(len as usize)
    }

    async fn push_chunk(
        &self,
        key: &str,
        chunk: &[Vec<u8>],
        end: End,
        deadline: Option<i64>,
    ) -> AdapterResult<i64> {
        let n = chunk.len() as i64;
        for _ in 0..=self.options.optimistic_retries {
            let meta = self.read_kind(&meta_key(key), Kind::List).await?;
            let old = meta.as_ref().map(Bounds::from_item).unwrap_or_default();
            let new = match end {
                End::Head => Bounds { head: old.head - n, ..old },
                End::Tail => Bounds { tail: old.tail + n, ..old },
            };

            let mut group = self.transaction();
            let meta_item = Item::new(meta_key(key), Kind::List)
                .with(attr::HEAD, AttributeValue::number(new.head))
                .with(attr::TAIL, AttributeValue::number(new.tail))
                .with_expiry(deadline);
            if meta.is_some() {
                let mut b = ExpressionBuilder::new();
                let head = b.compare(attr::HEAD, Comparator::Eq, AttributeValue::number(old.head));
                let tail = b.compare(attr::TAIL, Comparator::Eq, AttributeValue::number(old.tail));
                b.when(head).when(tail);
                group.put(meta_item, Flags::MUST_EXIST, b);
            } else {
                group.put(meta_item, Flags::MUST_NOT_EXIST, ExpressionBuilder::new());
            }

            for (i, value) in chunk.iter().enumerate() {
                let index = match end {
                    End::Head => old.head - 1 - i as i64,
                    End::Tail => old.tail + i as i64,
                };
                let item = Item::new(element_key(key, index), Kind::List)
                    .with_value(&Value::from_bytes(value.clone()))
                    .with_expiry(deadline);
                group.put(item, Flags::NONE, ExpressionBuilder::new());
            }

            if group.commit().await? {
                return Ok(new.len());
            }
        }
        Err(self.retries_exhausted(self.options.optimistic_retries + 1))
    }
}
