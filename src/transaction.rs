//! 多条目事务组
//!
//! 把若干单条目条件动作打包成一个全有或全无的单元。任一条件失败、事务冲突
//! 或后端取消，对调用方都表现为 `Ok(false)`。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AdapterError, AdapterResult, StoreError};
use crate::expr::ExpressionBuilder;
use crate::item::Item;
use crate::key::ItemKey;
use crate::atomic::Flags;
use crate::store::{DeleteRequest, ItemStore, PutRequest, ReturnValues, TransactAction, UpdateRequest};

/// 单个事务允许的动作数上限
pub const MAX_TRANSACTION_ACTIONS: usize = 100;

pub struct TransactionalGroup {
    store: Arc<dyn ItemStore>,
    table: String,
    actions: Vec<TransactAction>,
}

impl TransactionalGroup {
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            actions: Vec::new(),
        }
    }

    pub fn put(&mut self, item: Item, flags: Flags, mut builder: ExpressionBuilder) -> &mut Self {
        flags.apply(&mut builder);
        let expression = (!builder.is_empty()).then(|| builder.build());
        self.actions.push(TransactAction::Put(PutRequest {
            table: self.table.clone(),
            item,
            expression,
        }));
        self
    }

    pub fn update(&mut self, key: ItemKey, flags: Flags, mut builder: ExpressionBuilder) -> &mut Self {
        flags.apply(&mut builder);
        self.actions.push(TransactAction::Update(UpdateRequest {
            table: self.table.clone(),
            key,
            expression: builder.build(),
            return_values: ReturnValues::None,
        }));
        self
    }

    pub fn delete(&mut self, key: ItemKey, flags: Flags, mut builder: ExpressionBuilder) -> &mut Self {
        flags.apply(&mut builder);
        let expression = (!builder.is_empty()).then(|| builder.build());
        self.actions.push(TransactAction::Delete(DeleteRequest {
            table: self.table.clone(),
            key,
            expression,
            return_old: false,
        }));
        self
    }

    /// 只检查条件，不修改条目
    pub fn check(&mut self, key: ItemKey, flags: Flags, mut builder: ExpressionBuilder) -> &mut Self {
        flags.apply(&mut builder);
        self.actions.push(TransactAction::ConditionCheck {
            table: self.table.clone(),
            key,
            expression: builder.build(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 提交；空事务直接视为成功
    pub async fn commit(self) -> AdapterResult<bool> {
        if self.actions.is_empty() {
            return Ok(true);
        }
        if self.actions.len() > MAX_TRANSACTION_ACTIONS {
            return Err(AdapterError::InvalidArgument(format!(
                "transaction has {} actions, at most {} allowed",
                self.actions.len(),
                MAX_TRANSACTION_ACTIONS
            )));
        }

        let count = self.actions.len();
        match self.store.transact_write(self.actions).await {
            Ok(()) => {
                debug!("transaction of {} actions committed", count);
                Ok(true)
            }
            Err(StoreError::TransactionConflict) => {
                warn!("transaction of {} actions conflicted", count);
                Ok(false)
            }
            Err(e) if e.is_condition_outcome() => {
                debug!("transaction of {} actions rejected: {}", count, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
