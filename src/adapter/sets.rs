use std::collections::BTreeSet;

use super::{expect_kind, Adapter};
use crate::atomic::Flags;
use crate::error::AdapterResult;
use crate::expr::ExpressionBuilder;
use crate::item::Item;
use crate::key::{ItemKey, Kind, Tag};
use crate::store::{SortCondition, WriteRequest};

fn member_key(key: &str, member: &str) -> ItemKey {
    ItemKey::tagged(key, Tag::Member, member)
}

impl Adapter {
    // ==================== Set 操作 ====================

    /// SADD：返回新加入的成员数（并发时为尽力而为）
    pub async fn sadd(&self, key: &str, members: &[&str]) -> AdapterResult<usize> {
        let unique: BTreeSet<&str> = members.iter().copied().collect();
        let keys: Vec<ItemKey> = unique.iter().map(|m| member_key(key, m)).collect();

        let existing = self.read_many(&keys).await?;
        let deadline = self.key_deadline(key).await?;
        let mut writes = Vec::new();
        for (item_key, existing) in keys.into_iter().zip(existing) {
            match existing {
                Some(item) => expect_kind(&item, Kind::Set)?,
                None => {
                    let item = Item::new(item_key, Kind::Set).with_expiry(deadline);
                    writes.push(WriteRequest::Put(item));
                }
            }
        }
        let added = writes.len();
        self.batch().write_all(writes).await?;
        Ok(added)
    }

    /// SREM：返回实际移除的成员数
    pub async fn srem(&self, key: &str, members: &[&str]) -> AdapterResult<usize> {
        let writer = self.writer();
        let mut removed = 0;
        for member in members.iter().collect::<BTreeSet<_>>() {
            let (applied, _) = writer
                .conditional_delete(member_key(key, member), Flags::MUST_EXIST, ExpressionBuilder::new())
                .await?;
            if applied {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// SISMEMBER
    pub async fn sismember(&self, key: &str, member: &str) -> AdapterResult<bool> {
        Ok(self.read_kind(&member_key(key, member), Kind::Set).await?.is_some())
    }

    /// SMEMBERS：按字典序
    pub async fn smembers(&self, key: &str) -> AdapterResult<Vec<String>> {
        let items = self
            .scan(key, SortCondition::BeginsWith(Tag::Member.prefix().to_string()))
            .collect()
            .await?;
        Ok(items
            .iter()
            .filter_map(|item| item.key.member(Tag::Member).map(str::to_string))
            .collect())
    }

    /// SCARD
    pub async fn scard(&self, key: &str) -> AdapterResult<usize> {
        Ok(self
            .scan(key, SortCondition::BeginsWith(Tag::Member.prefix().to_string()))
            .count()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::options::AdapterOptions;
    use crate::store::{MemoryItemStore, MemoryStoreOptions};
    use std::sync::Arc;

    fn adapter() -> Adapter {
        let store = MemoryItemStore::with_options(MemoryStoreOptions {
            page_size: 3,
            ..Default::default()
        });
        Adapter::new(Arc::new(store), AdapterOptions::default())
    }

    #[tokio::test]
    async fn test_sadd_srem() {
        let a = adapter();
        assert_eq!(a.sadd("s", &["a", "b", "a"]).await.unwrap(), 2);
        assert_eq!(a.sadd("s", &["b", "c"]).await.unwrap(), 1);
        assert!(a.sismember("s", "c").await.unwrap());
        assert!(!a.sismember("s", "z").await.unwrap());
        assert_eq!(a.scard("s").await.unwrap(), 3);

        assert_eq!(a.srem("s", &["a", "z", "a"]).await.unwrap(), 1);
        assert_eq!(a.smembers("s").await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_large_set_spans_batches_and_pages() {
        let a = adapter();
        let names: Vec<String> = (0..60).map(|i| format!("m{:02}", i)).collect();
        let members: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(a.sadd("big", &members).await.unwrap(), 60);
        assert_eq!(a.scard("big").await.unwrap(), 60);
        assert_eq!(a.smembers("big").await.unwrap(), names);
    }

    #[tokio::test]
    async fn test_member_written_by_hash_is_wrong_type() {
        let a = adapter();
        // 直接写入一个不同种类、但地址相同的条目
        let item = Item::new(member_key("s", "x"), Kind::Hash);
        a.batch().write_all(vec![WriteRequest::Put(item)]).await.unwrap();
        assert!(matches!(a.sismember("s", "x").await, Err(AdapterError::WrongType)));
        assert!(matches!(a.sadd("s", &["x"]).await, Err(AdapterError::WrongType)));
    }
}
