//! 流
//!
//! `@seq` 计数器条目保存最后一个 ID 和长度；每个条目落在 `x#<id>`。
//! 追加时计数器前移和条目写入在同一事务中完成，计数器上的 `last < id`
//! 条件保证 ID 严格递增。

use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info};

use super::{now_ms, Adapter};
use crate::atomic::Flags;
use crate::error::{AdapterError, AdapterResult};
use crate::expr::{Comparator, ExpressionBuilder};
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind, Sentinel, Tag};
use crate::score::StreamId;
use crate::store::SortCondition;
use crate::value::AttributeValue;

/// 一个流条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StreamEntry {
    fn from_item(item: &Item) -> Option<StreamEntry> {
        let id = StreamId::decode(item.key.member(Tag::StreamEntry)?);
        let Some(AttributeValue::L(flat)) = item.attribute(attr::FIELDS) else {
            return None;
        };
        let fields = flat
            .chunks_exact(2)
            .filter_map(|pair| match pair {
                [AttributeValue::B(f), AttributeValue::B(v)] => Some((f.clone(), v.clone())),
                _ => None,
            })
            .collect();
        Some(StreamEntry { id, fields })
    }
}

fn meta_key(key: &str) -> ItemKey {
    ItemKey::sentinel(key, Sentinel::Sequence)
}

fn entry_key(key: &str, id: StreamId) -> ItemKey {
    ItemKey::tagged(key, Tag::StreamEntry, &id.encode())
}

fn last_id(meta: &Item) -> StreamId {
    meta.attribute(attr::LAST_ID)
        .and_then(AttributeValue::as_str)
        .map(StreamId::decode)
        .unwrap_or(StreamId::MIN)
}

impl Adapter {
    // ==================== Stream 操作 ====================

    /// XADD：`id` 为 None 时自动生成；返回实际写入的 ID
    pub async fn xadd(
        &self,
        key: &str,
        id: Option<StreamId>,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> AdapterResult<StreamId> {
        if fields.is_empty() {
            return Err(AdapterError::InvalidArgument(
                "wrong number of arguments for 'xadd' command".to_string(),
            ));
        }
        if id == Some(StreamId::MIN) {
            return Err(AdapterError::InvalidArgument(
                "The ID specified in XADD must be greater than 0-0".to_string(),
            ));
        }
        let flat: Vec<AttributeValue> = fields
            .into_iter()
            .flat_map(|(f, v)| [AttributeValue::B(f), AttributeValue::B(v)])
            .collect();

        let deadline = self.key_deadline(key).await?;
        for attempt in 0..=self.options.stream_append_retries {
            let meta = self.read_kind(&meta_key(key), Kind::Stream).await?;
            let last = meta.as_ref().map(last_id).unwrap_or(StreamId::MIN);
            let next = match id {
                Some(id) if id <= last => return Err(AdapterError::StreamIdTooSmall),
                Some(id) => id,
                None => StreamId::next_after(last, now_ms()).ok_or_else(|| {
                    AdapterError::InvalidArgument("stream ID space exhausted".to_string())
                })?,
            };

            let mut group = self.transaction();
            if meta.is_some() {
                let mut b = ExpressionBuilder::new();
                let behind = b.compare(attr::LAST_ID, Comparator::Lt, AttributeValue::string(next.encode()));
                b.when(behind)
                    .set(attr::LAST_ID, AttributeValue::string(next.encode()))
                    .add(attr::LENGTH, AttributeValue::number(1));
                group.update(meta_key(key), Flags::MUST_EXIST, b);
            } else {
                let counter = Item::new(meta_key(key), Kind::Stream)
                    .with(attr::LAST_ID, AttributeValue::string(next.encode()))
                    .with(attr::LENGTH, AttributeValue::number(1))
                    .with_expiry(deadline);
                group.put(counter, Flags::MUST_NOT_EXIST, ExpressionBuilder::new());
            }
            let entry = Item::new(entry_key(key, next), Kind::Stream)
                .with(attr::FIELDS, AttributeValue::L(flat.clone()))
                .with_expiry(deadline);
            group.put(entry, Flags::MUST_NOT_EXIST, ExpressionBuilder::new());

            if group.commit().await? {
                if meta.is_none() {
                    info!("stream {} created at {}", key, next);
                }
                return Ok(next);
            }
            debug!("xadd {} lost race for {} (attempt {})", key, next, attempt + 1);
        }
        Err(self.retries_exhausted(self.options.stream_append_retries + 1))
    }

    /// XRANGE start end [COUNT count]：闭区间，按 ID 升序
    pub async fn xrange(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> AdapterResult<Vec<StreamEntry>> {
        if start > end {
            return Ok(Vec::new());
        }
        let lower = entry_key(key, start).sort;
        let upper = entry_key(key, end).sort;
        let items = self
            .scan(key, SortCondition::Between(lower, upper))
            .with_limit(count)
            .collect()
            .await?;
        Ok(items.iter().filter_map(StreamEntry::from_item).collect())
    }

    /// XLEN
    pub async fn xlen(&self, key: &str) -> AdapterResult<usize> {
        let meta = self.read_kind(&meta_key(key), Kind::Stream).await?;
        Ok(meta
            .as_ref()
            .and_then(|m| m.attribute(attr::LENGTH))
            .and_then(AttributeValue::as_decimal)
            .and_then(|d| d.to_usize())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AdapterOptions;
    use crate::store::{MemoryItemStore, MemoryStoreOptions};
    use std::sync::Arc;

    fn adapter() -> Adapter {
        let store = MemoryItemStore::with_options(MemoryStoreOptions {
            page_size: 2,
            ..Default::default()
        });
        Adapter::new(Arc::new(store), AdapterOptions::default())
    }

    fn fields(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![(b"n".to_vec(), n.to_string().into_bytes())]
    }

    #[tokio::test]
    async fn test_auto_ids_are_strictly_increasing() {
        let a = adapter();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(a.xadd("s", None, fields(i)).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(a.xlen("s").await.unwrap(), 5);

        let all = a.xrange("s", StreamId::MIN, StreamId::MAX, None).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
        assert_eq!(all[3].fields, fields(3));

        let first_two = a.xrange("s", StreamId::MIN, StreamId::MAX, Some(2)).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[1].id, ids[1]);
    }

    #[tokio::test]
    async fn test_explicit_ids() {
        let a = adapter();
        assert_eq!(a.xadd("s", Some(StreamId::new(5, 1)), fields(0)).await.unwrap(), StreamId::new(5, 1));
        assert!(matches!(
            a.xadd("s", Some(StreamId::new(5, 1)), fields(1)).await,
            Err(AdapterError::StreamIdTooSmall)
        ));
        assert!(matches!(
            a.xadd("s", Some(StreamId::new(4, 9)), fields(1)).await,
            Err(AdapterError::StreamIdTooSmall)
        ));
        assert!(matches!(
            a.xadd("s", Some(StreamId::MIN), fields(1)).await,
            Err(AdapterError::InvalidArgument(_))
        ));
        a.xadd("s", Some(StreamId::new(7, 0)), fields(2)).await.unwrap();

        let range = a
            .xrange("s", StreamId::parse_bound("5", false).unwrap(), StreamId::parse_bound("6", true).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].id, StreamId::new(5, 1));
        assert_eq!(a.xlen("s").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_binary_fields_round_trip() {
        let a = adapter();
        let payload = vec![(vec![0u8, 255], vec![0xc3, 0x28])];
        let id = a.xadd("s", None, payload.clone()).await.unwrap();
        let entries = a.xrange("s", id, id, None).await.unwrap();
        assert_eq!(entries, vec![StreamEntry { id, fields: payload }]);
    }

    #[tokio::test]
    async fn test_empty_fields_rejected() {
        let a = adapter();
        assert!(matches!(a.xadd("s", None, Vec::new()).await, Err(AdapterError::InvalidArgument(_))));
        assert_eq!(a.xlen("s").await.unwrap(), 0);
        assert!(a.xrange("s", StreamId::MAX, StreamId::MIN, None).await.unwrap().is_empty());
    }
}
