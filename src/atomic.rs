//! 单条目条件写
//!
//! 条件不满足是正常结果（`Ok(false)`），不是错误；其他后端错误原样返回。

use std::ops::BitOr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{AdapterResult, StoreError, StoreResult};
use crate::expr::ExpressionBuilder;
use crate::item::Item;
use crate::key::{attr, ItemKey};
use crate::store::{DeleteRequest, ItemStore, PutRequest, ReturnValues, UpdateRequest};

/// 写前置条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// 条目必须不存在
    pub const MUST_NOT_EXIST: Flags = Flags(1);
    /// 条目必须已存在
    pub const MUST_EXIST: Flags = Flags(1 << 1);

    pub fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// 把标志翻译成对分区键的存在性条件
    pub fn apply(&self, builder: &mut ExpressionBuilder) {
        if self.contains(Flags::MUST_NOT_EXIST) {
            let c = builder.not_exists(attr::PK);
            builder.when(c);
        }
        if self.contains(Flags::MUST_EXIST) {
            let c = builder.exists(attr::PK);
            builder.when(c);
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// 把“条件失败”吸收为 None，其余错误继续传播
pub(crate) fn absorb_condition_failure<T>(result: StoreResult<T>) -> AdapterResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::ConditionalCheckFailed) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 单条目条件写入器
#[derive(Clone)]
pub struct AtomicWriter {
    store: Arc<dyn ItemStore>,
    table: String,
}

impl AtomicWriter {
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// 整条写入；`builder` 可携带额外条件
    pub async fn conditional_put(&self, item: Item, flags: Flags, mut builder: ExpressionBuilder) -> AdapterResult<bool> {
        flags.apply(&mut builder);
        let key = item.key.clone();
        let expression = (!builder.is_empty()).then(|| builder.build());
        let result = self
            .store
            .put_item(PutRequest {
                table: self.table.clone(),
                item,
                expression,
            })
            .await;
        let applied = absorb_condition_failure(result)?.is_some();
        debug!("conditional put {} -> {}", key, applied);
        Ok(applied)
    }

    /// 按表达式更新；返回 (是否生效, 请求的镜像)
    pub async fn conditional_update(
        &self,
        key: ItemKey,
        flags: Flags,
        mut builder: ExpressionBuilder,
        return_values: ReturnValues,
    ) -> AdapterResult<(bool, Option<Item>)> {
        flags.apply(&mut builder);
        let result = self
            .store
            .update_item(UpdateRequest {
                table: self.table.clone(),
                key: key.clone(),
                expression: builder.build(),
                return_values,
            })
            .await;
        let outcome = absorb_condition_failure(result)?;
        debug!("conditional update {} -> {}", key, outcome.is_some());
        Ok(match outcome {
            Some(image) => (true, image),
            None => (false, None),
        })
    }

    /// 删除；返回 (是否生效, 删除前的条目)
    pub async fn conditional_delete(
        &self,
        key: ItemKey,
        flags: Flags,
        mut builder: ExpressionBuilder,
    ) -> AdapterResult<(bool, Option<Item>)> {
        flags.apply(&mut builder);
        let expression = (!builder.is_empty()).then(|| builder.build());
        let result = self
            .store
            .delete_item(DeleteRequest {
                table: self.table.clone(),
                key: key.clone(),
                expression,
                return_old: true,
            })
            .await;
        let outcome = absorb_condition_failure(result)?;
        debug!("conditional delete {} -> {}", key, outcome.is_some());
        Ok(match outcome {
            Some(old) => (true, old),
            None => (false, None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::expr::Comparator;
    use crate::key::Kind;
    use crate::store::MemoryItemStore;
    use crate::value::{AttributeValue, Value};
    use async_trait::async_trait;

    fn writer() -> (AtomicWriter, Arc<MemoryItemStore>) {
        let store = Arc::new(MemoryItemStore::new());
        (AtomicWriter::new(store.clone(), "t"), store)
    }

    fn scalar(value: &str) -> Item {
        Item::new(ItemKey::scalar("hello"), Kind::String).with_value(&Value::from(value))
    }

    async fn read(store: &MemoryItemStore) -> Value {
        store
            .get_item("t", &ItemKey::scalar("hello"), true)
            .await
            .unwrap()
            .map(|i| i.value())
            .unwrap_or(Value::Absent)
    }

    #[test]
    fn test_flags() {
        let both = Flags::MUST_EXIST | Flags::MUST_NOT_EXIST;
        assert!(both.contains(Flags::MUST_EXIST));
        assert!(!Flags::NONE.contains(Flags::MUST_EXIST));
        assert!(!Flags::NONE.contains(Flags::NONE));

        let mut b = ExpressionBuilder::new();
        Flags::MUST_NOT_EXIST.apply(&mut b);
        assert_eq!(b.condition_expression().as_deref(), Some("attribute_not_exists(#n0)"));
    }

    #[tokio::test]
    async fn test_put_must_not_exist() {
        let (writer, store) = writer();
        assert!(writer.conditional_put(scalar("world"), Flags::MUST_NOT_EXIST, ExpressionBuilder::new()).await.unwrap());
        assert!(!writer.conditional_put(scalar("other"), Flags::MUST_NOT_EXIST, ExpressionBuilder::new()).await.unwrap());
        assert_eq!(read(&store).await, Value::from("world"));
    }

    #[tokio::test]
    async fn test_put_must_exist_on_missing() {
        let (writer, store) = writer();
        assert!(!writer.conditional_put(scalar("x"), Flags::MUST_EXIST, ExpressionBuilder::new()).await.unwrap());
        assert_eq!(read(&store).await, Value::Absent);
    }

    #[tokio::test]
    async fn test_update_with_extra_condition() {
        let (writer, store) = writer();
        writer.conditional_put(scalar("a"), Flags::NONE, ExpressionBuilder::new()).await.unwrap();

        let swap = |from: &str, to: &str| {
            let mut b = ExpressionBuilder::new();
            let c = b.compare(attr::VALUE, Comparator::Eq, AttributeValue::string(from));
            b.when(c).set(attr::VALUE, AttributeValue::string(to));
            b
        };
        let (ok, image) = writer
            .conditional_update(ItemKey::scalar("hello"), Flags::MUST_EXIST, swap("a", "b"), ReturnValues::AllNew)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(image.unwrap().value(), Value::from("b"));

        let (ok, image) = writer
            .conditional_update(ItemKey::scalar("hello"), Flags::MUST_EXIST, swap("a", "c"), ReturnValues::AllNew)
            .await
            .unwrap();
        assert!(!ok);
        assert!(image.is_none());
        assert_eq!(read(&store).await, Value::from("b"));
    }

    #[tokio::test]
    async fn test_delete_returns_old() {
        let (writer, _store) = writer();
        let (ok, _) = writer
            .conditional_delete(ItemKey::scalar("hello"), Flags::MUST_EXIST, ExpressionBuilder::new())
            .await
            .unwrap();
        assert!(!ok);

        writer.conditional_put(scalar("bye"), Flags::NONE, ExpressionBuilder::new()).await.unwrap();
        let (ok, old) = writer
            .conditional_delete(ItemKey::scalar("hello"), Flags::MUST_EXIST, ExpressionBuilder::new())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(old.unwrap().value(), Value::from("bye"));
    }

    /// 总是报服务错误的后端
    struct FailingStore;

    #[async_trait]
    impl ItemStore for FailingStore {
        async fn get_item(&self, _: &str, _: &ItemKey, _: bool) -> StoreResult<Option<Item>> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn put_item(&self, _: PutRequest) -> StoreResult<()> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn update_item(&self, _: UpdateRequest) -> StoreResult<Option<Item>> {
            Err(StoreError::Throttled)
        }
        async fn delete_item(&self, _: DeleteRequest) -> StoreResult<Option<Item>> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn query(&self, _: crate::store::QueryRequest) -> StoreResult<crate::store::QueryPage> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn batch_write(
            &self,
            _: &str,
            _: Vec<crate::store::WriteRequest>,
        ) -> StoreResult<Vec<crate::store::WriteRequest>> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn transact_write(&self, _: Vec<crate::store::TransactAction>) -> StoreResult<()> {
            Err(StoreError::Service("down".to_string()))
        }
        async fn transact_get(&self, _: &str, _: &[ItemKey]) -> StoreResult<Vec<Option<Item>>> {
            Err(StoreError::Service("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_fault_is_an_error() {
        let writer = AtomicWriter::new(Arc::new(FailingStore), "t");
        let err = writer
            .conditional_put(scalar("x"), Flags::MUST_NOT_EXIST, ExpressionBuilder::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Backend(StoreError::Service(_))));

        let err = writer
            .conditional_update(ItemKey::scalar("x"), Flags::NONE, ExpressionBuilder::new(), ReturnValues::None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Backend(StoreError::Throttled)));
    }
}
