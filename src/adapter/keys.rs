use super::{deadline_after, now_secs, Adapter};
use crate::atomic::Flags;
use crate::error::AdapterResult;
use crate::expr::ExpressionBuilder;
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind, Sentinel};
use crate::store::{ReturnValues, SortCondition};
use crate::value::AttributeValue;

fn is_ttl_sentinel(key: &ItemKey) -> bool {
    key.sort == Sentinel::Ttl.sort_key()
}

impl Adapter {
    // ==================== 通用键操作 ====================
    //
    // 一个 Redis 键就是一个分区；这些命令作用于分区内的全部条目，
    // 逐条执行，不是原子的。`@ttl` 哨兵只记录过期时间，不算键的内容。

    /// DEL：返回被删除的键数
    pub async fn del(&self, keys: &[&str]) -> AdapterResult<usize> {
        let mut deleted = 0;
        for key in keys {
            let item_keys = self.partition_keys(key).await?;
            if item_keys.is_empty() {
                continue;
            }
            let had_data = item_keys.iter().any(|k| !is_ttl_sentinel(k));
            self.delete_items(item_keys).await?;
            if had_data {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// EXISTS：返回存在的键数（重复出现的键重复计数）
    pub async fn exists(&self, keys: &[&str]) -> AdapterResult<usize> {
        let mut found = 0;
        for key in keys {
            if self.first_item(key).await?.is_some() {
                found += 1;
            }
        }
        Ok(found)
    }

    /// EXPIRE：给键下的每个条目打上截止时间；非正数立即删除
    ///
    /// 集合类键另外写入 `@ttl` 哨兵，之后写入的成员沿用同一截止时间。
    pub async fn expire(&self, key: &str, seconds: i64) -> AdapterResult<bool> {
        if seconds <= 0 {
            return Ok(self.del(&[key]).await? > 0);
        }
        let deadline = deadline_after(seconds.unsigned_abs(), "expire")?;
        let item_keys: Vec<ItemKey> = self
            .partition_keys(key)
            .await?
            .into_iter()
            .filter(|k| !is_ttl_sentinel(k))
            .collect();
        if item_keys.is_empty() {
            return Ok(false);
        }

        let writer = self.writer();
        // 先写哨兵，并发的集合写入才能读到新的截止时间
        if item_keys.iter().any(|k| *k != ItemKey::scalar(key)) {
            let sentinel = Item::new(ItemKey::sentinel(key, Sentinel::Ttl), Kind::Meta)
                .with_expiry(Some(deadline));
            writer
                .conditional_put(sentinel, Flags::NONE, ExpressionBuilder::new())
                .await?;
        }
        let mut applied = false;
        for item_key in item_keys {
            let mut b = ExpressionBuilder::new();
            b.set(attr::TTL, AttributeValue::number(deadline));
            let (ok, _) = writer
                .conditional_update(item_key, Flags::MUST_EXIST, b, ReturnValues::None)
                .await?;
            applied |= ok;
        }
        Ok(applied)
    }

    /// TTL：-2 表示键不存在，-1 表示没有过期时间
    pub async fn ttl(&self, key: &str) -> AdapterResult<i64> {
        let Some(first) = self.first_item(key).await? else {
            return Ok(-2);
        };
        let deadline = match self.key_deadline(key).await? {
            Some(deadline) => Some(deadline),
            None => first.expires_at(),
        };
        Ok(deadline.map_or(-1, |deadline| (deadline - now_secs()).max(0)))
    }

    /// PERSIST：移除过期时间；原本没有过期时间时返回 false
    pub async fn persist(&self, key: &str) -> AdapterResult<bool> {
        let writer = self.writer();
        let mut applied = false;
        for item_key in self.partition_keys(key).await? {
            if is_ttl_sentinel(&item_key) {
                writer
                    .conditional_delete(item_key, Flags::NONE, ExpressionBuilder::new())
                    .await?;
                continue;
            }
            let mut b = ExpressionBuilder::new();
            let has_ttl = b.exists(attr::TTL);
            b.when(has_ttl).remove(attr::TTL);
            let (ok, _) = writer
                .conditional_update(item_key, Flags::MUST_EXIST, b, ReturnValues::None)
                .await?;
            applied |= ok;
        }
        Ok(applied)
    }

    /// 分区中第一个数据条目；`@ttl` 哨兵至多占一条，取两条足够
    async fn first_item(&self, key: &str) -> AdapterResult<Option<Item>> {
        let items = self
            .scan(key, SortCondition::All)
            .with_limit(Some(2))
            .collect()
            .await?;
        Ok(items.into_iter().find(|item| !is_ttl_sentinel(&item.key)))
    }

    async fn partition_keys(&self, key: &str) -> AdapterResult<Vec<ItemKey>> {
        let items = self.scan(key, SortCondition::All).collect().await?;
        Ok(items.into_iter().map(|item| item.key).collect())
    }
}
