//! 有序集合
//!
//! 每个成员两条条目：
//! - `z#<member>`：成员条目，保存编码后的分数，用于 ZSCORE 和条件更新；
//! - `s#<score>#<member>`：分数索引条目，排序键按分数有序，用于范围扫描。
//!
//! 两条条目总是在同一个事务里改变，成员条目上的旧分数作为乐观锁。

use std::collections::BTreeMap;

use super::{expect_kind, Adapter};
use crate::atomic::Flags;
use crate::error::{AdapterError, AdapterResult};
use crate::expr::{Comparator, ExpressionBuilder};
use crate::item::Item;
use crate::key::{attr, ItemKey, Kind, Tag};
use crate::score::{decode_score, encode_score};
use crate::store::SortCondition;
use crate::value::AttributeValue;

/// 大于 `#` 的下一个字符，作为同一分数下所有成员的上界
const INDEX_UPPER: char = '$';

fn member_key(key: &str, member: &str) -> ItemKey {
    ItemKey::tagged(key, Tag::ZMember, member)
}

fn index_key(key: &str, encoded: &str, member: &str) -> ItemKey {
    ItemKey::tagged(key, Tag::ZScore, &format!("{}#{}", encoded, member))
}

fn stored_score(item: &Item) -> Option<String> {
    item.attribute(attr::SCORE)
        .and_then(AttributeValue::as_str)
        .map(str::to_string)
}

fn check_score(score: f64) -> AdapterResult<f64> {
    if score.is_nan() {
        return Err(AdapterError::NotFloat);
    }
    Ok(score)
}

impl Adapter {
    // ==================== Sorted Set 操作 ====================

    /// ZADD：返回新增成员数；同一成员出现多次时以最后一次为准
    pub async fn zadd(&self, key: &str, entries: &[(f64, &str)]) -> AdapterResult<usize> {
        let mut latest: BTreeMap<&str, f64> = BTreeMap::new();
        for (score, member) in entries {
            latest.insert(*member, check_score(*score)?);
        }
        let deadline = self.key_deadline(key).await?;
        let mut added = 0;
        for (member, score) in latest {
            let (old, _) = self.rescore(key, member, deadline, |_| Ok(score)).await?;
            if old.is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    /// ZSCORE
    pub async fn zscore(&self, key: &str, member: &str) -> AdapterResult<Option<f64>> {
        let item = self.read_kind(&member_key(key, member), Kind::ZSet).await?;
        Ok(item.as_ref().and_then(stored_score).map(|s| decode_score(&s)))
    }

    /// ZINCRBY：返回新分数
    pub async fn zincrby(&self, key: &str, delta: f64, member: &str) -> AdapterResult<f64> {
        check_score(delta)?;
        let deadline = self.key_deadline(key).await?;
        let (_, score) = self
            .rescore(key, member, deadline, |old| check_score(old.unwrap_or(0.0) + delta))
            .await?;
        Ok(score)
    }

    /// ZREM：返回实际移除的成员数
    pub async fn zrem(&self, key: &str, members: &[&str]) -> AdapterResult<usize> {
        let mut removed = 0;
        for member in members {
            if self.remove_member(key, member).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// ZCARD
    pub async fn zcard(&self, key: &str) -> AdapterResult<usize> {
        Ok(self
            .scan(key, SortCondition::BeginsWith(Tag::ZMember.prefix().to_string()))
            .count()
            .await?)
    }

    /// ZRANGEBYSCORE min max [LIMIT 0 count]：闭区间，按分数升序，同分按成员字典序
    pub async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        count: Option<usize>,
    ) -> AdapterResult<Vec<(String, f64)>> {
        let (min, max) = (check_score(min)?, check_score(max)?);
        if min > max {
            return Ok(Vec::new());
        }
        // 区间端点上的 0 同时覆盖 -0.0 和 0.0
        let min = if min == 0.0 { -0.0 } else { min };
        let max = if max == 0.0 { 0.0 } else { max };
        let lower = format!("{}{}", Tag::ZScore.prefix(), encode_score(min));
        let upper = format!("{}{}{}", Tag::ZScore.prefix(), encode_score(max), INDEX_UPPER);
        let items = self
            .scan(key, SortCondition::Between(lower, upper))
            .with_limit(count)
            .collect()
            .await?;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            expect_kind(&item, Kind::ZIndex)?;
            let member = item.attribute(attr::MEMBER).and_then(AttributeValue::as_str);
            if let (Some(member), Some(score)) = (member, stored_score(&item)) {
                out.push((member.to_string(), decode_score(&score)));
            }
        }
        Ok(out)
    }

    /// 读旧分数、计算新分数，在一个事务里换掉成员条目和索引条目；
    /// 事务因并发修改失败时重读重试。返回 (旧分数, 新分数)
    async fn rescore<F>(
        &self,
        key: &str,
        member: &str,
        deadline: Option<i64>,
        f: F,
    ) -> AdapterResult<(Option<f64>, f64)>
    where
        F: Fn(Option<f64>) -> AdapterResult<f64>,
    {
        let item_key = member_key(key, member);
        for _ in 0..=self.options.optimistic_retries {
            let current = self.read_kind(&item_key, Kind::ZSet).await?;
            let old_encoded = current.as_ref().and_then(stored_score);
            let old = old_encoded.as_deref().map(decode_score);
            let new = f(old)?;
            let new_encoded = encode_score(new);

            // 按编码比较，这样 0.0 与 -0.0 也会被视为不同的分数
            if old_encoded.as_deref() == Some(new_encoded.as_str()) {
                return Ok((old, new));
            }

            let mut group = self.transaction();
            let member_item = Item::new(item_key.clone(), Kind::ZSet)
                .with(attr::SCORE, AttributeValue::string(new_encoded.clone()))
                .with_expiry(deadline);
            match &old_encoded {
                None => {
                    group.put(member_item, Flags::MUST_NOT_EXIST, ExpressionBuilder::new());
                }
                Some(previous) => {
                    let mut b = ExpressionBuilder::new();
                    let unchanged =
                        b.compare(attr::SCORE, Comparator::Eq, AttributeValue::string(previous.clone()));
                    b.when(unchanged);
                    group.put(member_item, Flags::MUST_EXIST, b);
                    group.delete(index_key(key, previous, member), Flags::NONE, ExpressionBuilder::new());
                }
            }
            let index = Item::new(index_key(key, &new_encoded, member), Kind::ZIndex)
                .with(attr::MEMBER, AttributeValue::string(member))
                .with(attr::SCORE, AttributeValue::string(new_encoded.clone()))
                .with_expiry(deadline);
            group.put(index, Flags::NONE, ExpressionBuilder::new());

            if group.commit().await? {
                return Ok((old, new));
            }
        }
        Err(self.retries_exhausted(self.options.optimistic_retries + 1))
    }

    async fn remove_member(&self, key: &str, member: &str) -> AdapterResult<bool> {
        let item_key = member_key(key, member);
        for _ in 0..=self.options.optimistic_retries {
            let Some(current) = self.read_kind(&item_key, Kind::ZSet).await? else {
                return Ok(false);
            };
            let Some(encoded) = stored_score(&current) else {
                return Ok(false);
            };
            let mut b = ExpressionBuilder::new();
            let unchanged = b.compare(attr::SCORE, Comparator::Eq, AttributeValue::string(encoded.clone()));
            b.when(unchanged);

            let mut group = self.transaction();
            group
                .delete(item_key.clone(), Flags::MUST_EXIST, b)
                .delete(index_key(key, &encoded, member), Flags::NONE, ExpressionBuilder::new());
            if group.commit().await? {
                return Ok(true);
            }
        }
        Err(self.retries_exhausted(self.options.optimistic_retries + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::AdapterOptions;
    use crate::store::{MemoryItemStore, MemoryStoreOptions};
    use std::sync::Arc;

    fn adapter() -> (Adapter, Arc<MemoryItemStore>) {
        let store = Arc::new(MemoryItemStore::with_options(MemoryStoreOptions {
            page_size: 2,
            ..Default::default()
        }));
        (Adapter::new(store.clone(), AdapterOptions::default()), store)
    }

    fn names(range: &[(String, f64)]) -> Vec<&str> {
        range.iter().map(|(m, _)| m.as_str()).collect()
    }

    #[tokio::test]
    async fn test_range_orders_by_score_then_member() {
        let (a, _) = adapter();
        let added = a
            .zadd("z", &[(3.5, "c"), (-1.0, "a"), (0.0, "b"), (3.5, "b2"), (-1e300, "min")])
            .await
            .unwrap();
        assert_eq!(added, 5);
        assert_eq!(a.zcard("z").await.unwrap(), 5);

        let all = a.zrangebyscore("z", f64::NEG_INFINITY, f64::INFINITY, None).await.unwrap();
        assert_eq!(names(&all), vec!["min", "a", "b", "b2", "c"]);

        let middle = a.zrangebyscore("z", -1.0, 3.5, None).await.unwrap();
        assert_eq!(names(&middle), vec!["a", "b", "b2", "c"]);

        let limited = a.zrangebyscore("z", -1.0, 3.5, Some(3)).await.unwrap();
        assert_eq!(names(&limited), vec!["a", "b", "b2"]);

        assert!(a.zrangebyscore("z", 5.0, 1.0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rescore_moves_index_entry() {
        let (a, store) = adapter();
        assert_eq!(a.zadd("z", &[(1.0, "m")]).await.unwrap(), 1);
        assert_eq!(a.zadd("z", &[(10.0, "m")]).await.unwrap(), 0);
        assert_eq!(a.zscore("z", "m").await.unwrap(), Some(10.0));

        // 成员条目 + 唯一的索引条目
        assert_eq!(store.len("redis"), 2);
        assert!(a.zrangebyscore("z", 0.0, 5.0, None).await.unwrap().is_empty());
        assert_eq!(
            a.zrangebyscore("z", 5.0, 15.0, None).await.unwrap(),
            vec![("m".to_string(), 10.0)]
        );
    }

    #[tokio::test]
    async fn test_zincrby_and_zrem() {
        let (a, store) = adapter();
        assert_eq!(a.zincrby("z", 2.5, "m").await.unwrap(), 2.5);
        assert_eq!(a.zincrby("z", -5.0, "m").await.unwrap(), -2.5);
        assert_eq!(a.zscore("z", "m").await.unwrap(), Some(-2.5));

        assert_eq!(a.zrem("z", &["m", "missing"]).await.unwrap(), 1);
        assert_eq!(a.zscore("z", "m").await.unwrap(), None);
        assert_eq!(a.zcard("z").await.unwrap(), 0);
        assert!(store.is_empty("redis"));
    }

    #[tokio::test]
    async fn test_nan_is_rejected() {
        let (a, _) = adapter();
        assert!(matches!(a.zadd("z", &[(f64::NAN, "m")]).await, Err(AdapterError::NotFloat)));
        a.zadd("z", &[(f64::INFINITY, "m")]).await.unwrap();
        assert!(matches!(
            a.zincrby("z", f64::NEG_INFINITY, "m").await,
            Err(AdapterError::NotFloat)
        ));
        assert_eq!(a.zscore("z", "m").await.unwrap(), Some(f64::INFINITY));
    }

    #[tokio::test]
    async fn test_negative_zero_is_a_distinct_score() {
        let (a, store) = adapter();
        a.zadd("z", &[(0.0, "m")]).await.unwrap();
        a.zadd("z", &[(-0.0, "m")]).await.unwrap();
        let score = a.zscore("z", "m").await.unwrap().unwrap();
        assert!(score.is_sign_negative());
        assert_eq!(store.len("redis"), 2);
        assert_eq!(a.zrangebyscore("z", 0.0, 0.0, None).await.unwrap().len(), 1);
    }
}
