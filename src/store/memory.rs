//! 内存存储实现
//!
//! 使用 BTreeMap 实现的进程内条目存储，完整实现 `ItemStore` 的语义：
//! 条件表达式求值、按页查询、批量写、事务写。TTL 过期的条目对所有读写不可见，
//! 行为与托管过期的后端一致。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{
    Cursor, DeleteRequest, ItemStore, PutRequest, QueryPage, QueryRequest, ReturnValues, Select,
    TransactAction, UpdateRequest, WriteRequest,
};
use crate::error::{StoreError, StoreResult};
use crate::expr::{Comparator, Condition, Expression, UpdateAction};
use crate::item::{Attributes, Item};
use crate::key::{attr, ItemKey};
use crate::value::AttributeValue;

/// 单次批量写的请求上限
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;
/// 单个事务的动作上限
pub const MAX_TRANSACT_ITEMS: usize = 100;

#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// 查询单页最多返回的条目数
    pub page_size: usize,
    /// 每次批量写最多处理的请求数，其余作为未处理返回；None 表示全部处理
    pub batch_capacity: Option<usize>,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            batch_capacity: None,
        }
    }
}

type Table = BTreeMap<ItemKey, Attributes>;

/// 内存存储实现
#[derive(Clone)]
pub struct MemoryItemStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    options: MemoryStoreOptions,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            options,
        }
    }

    /// 表中未过期条目的数量
    pub fn len(&self, table: &str) -> usize {
        let now = now_secs();
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().filter(|a| is_live(a, now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn live_item(table: Option<&Table>, key: &ItemKey, now: i64) -> Option<Item> {
        table
            .and_then(|t| t.get(key))
            .filter(|a| is_live(a, now))
            .map(|a| Item {
                key: key.clone(),
                attributes: a.clone(),
            })
    }
}

impl Default for MemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// TTL 已过的条目视为不存在
fn is_live(attributes: &Attributes, now: i64) -> bool {
    use rust_decimal::prelude::ToPrimitive;
    match attributes.get(attr::TTL).and_then(AttributeValue::as_decimal) {
        Some(ttl) => ttl.to_i64().is_none_or(|t| t > now),
        None => true,
    }
}

// ==================== 表达式求值 ====================

fn resolve_name<'a>(expr: &'a Expression, placeholder: &str) -> StoreResult<&'a str> {
    expr.name(placeholder).ok_or_else(|| {
        StoreError::Validation(format!("unresolved attribute name placeholder {}", placeholder))
    })
}

fn resolve_value<'a>(expr: &'a Expression, placeholder: &str) -> StoreResult<&'a AttributeValue> {
    expr.value(placeholder).ok_or_else(|| {
        StoreError::Validation(format!("unresolved attribute value placeholder {}", placeholder))
    })
}

fn compare_values(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::N(_), AttributeValue::N(_)) => a.as_decimal()?.partial_cmp(&b.as_decimal()?),
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.cmp(y)),
        (AttributeValue::L(_), AttributeValue::L(_)) | (AttributeValue::Null, AttributeValue::Null) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

fn evaluate(expr: &Expression, condition: &Condition, current: Option<&Item>) -> StoreResult<bool> {
    let lookup = |placeholder: &str| -> StoreResult<Option<AttributeValue>> {
        let name = resolve_name(expr, placeholder)?;
        Ok(current.and_then(|item| item.get(name)))
    };
    Ok(match condition {
        Condition::Exists(name) => lookup(name)?.is_some(),
        Condition::NotExists(name) => lookup(name)?.is_none(),
        Condition::Compare { name, op, value } => {
            let expected = resolve_value(expr, value)?;
            let ordering = lookup(name)?.and_then(|actual| compare_values(&actual, expected));
            match op {
                Comparator::Eq => ordering == Some(Ordering::Equal),
                Comparator::Ne => ordering != Some(Ordering::Equal),
                Comparator::Lt => ordering == Some(Ordering::Less),
                Comparator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                Comparator::Gt => ordering == Some(Ordering::Greater),
                Comparator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }
        }
        Condition::HasType { name, value } => {
            let expected = resolve_value(expr, value)?
                .as_str()
                .ok_or_else(|| StoreError::Validation("attribute_type expects a string operand".to_string()))?;
            lookup(name)?.is_some_and(|actual| actual.type_tag().as_str() == expected)
        }
        Condition::Or(parts) => {
            for part in parts {
                if evaluate(expr, part, current)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

fn conditions_hold(expr: Option<&Expression>, current: Option<&Item>) -> StoreResult<bool> {
    let Some(expr) = expr else {
        return Ok(true);
    };
    for condition in &expr.conditions {
        if !evaluate(expr, condition, current)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_updates(expr: &Expression, key: &ItemKey, current: Option<Item>) -> StoreResult<Item> {
    let mut item = current.unwrap_or_else(|| Item {
        key: key.clone(),
        attributes: Attributes::new(),
    });
    for action in &expr.updates {
        let target = match action {
            UpdateAction::Set { name, .. }
            | UpdateAction::SetIfNotExists { name, .. }
            | UpdateAction::Add { name, .. }
            | UpdateAction::Remove { name } => resolve_name(expr, name)?,
        };
        if target == attr::PK || target == attr::SK {
            return Err(StoreError::Validation(format!(
                "Cannot update attribute {}. This attribute is part of the key",
                target
            )));
        }
        match action {
            UpdateAction::Set { value, .. } => {
                let value = resolve_value(expr, value)?.clone();
                item.attributes.insert(target.to_string(), value);
            }
            UpdateAction::SetIfNotExists { value, .. } => {
                if !item.attributes.contains_key(target) {
                    let value = resolve_value(expr, value)?.clone();
                    item.attributes.insert(target.to_string(), value);
                }
            }
            UpdateAction::Add { value, .. } => {
                let delta = resolve_value(expr, value)?.as_decimal().ok_or_else(|| {
                    StoreError::Validation("ADD expects a numeric operand".to_string())
                })?;
                let sum = match item.attributes.get(target) {
                    None => delta,
                    Some(existing) => existing
                        .as_decimal()
                        .ok_or_else(|| {
                            StoreError::Validation(
                                "An operand in the update expression has an incorrect data type".to_string(),
                            )
                        })?
                        .checked_add(delta)
                        .ok_or_else(|| StoreError::Validation("Number overflow".to_string()))?,
                };
                item.attributes.insert(target.to_string(), AttributeValue::number(sum));
            }
            UpdateAction::Remove { .. } => {
                item.attributes.remove(target);
            }
        }
    }
    Ok(item)
}

fn ensure_unique_keys<'a>(keys: impl Iterator<Item = &'a ItemKey>) -> StoreResult<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(StoreError::Validation(format!(
                "Provided list of item keys contains duplicates: {}",
                key
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get_item(&self, table: &str, key: &ItemKey, _consistent: bool) -> StoreResult<Option<Item>> {
        let tables = self.tables.read();
        Ok(Self::live_item(tables.get(table), key, now_secs()))
    }

    async fn put_item(&self, req: PutRequest) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let now = now_secs();
        let current = Self::live_item(tables.get(&req.table), &req.item.key, now);
        if !conditions_hold(req.expression.as_ref(), current.as_ref())? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        tables
            .entry(req.table)
            .or_default()
            .insert(req.item.key, req.item.attributes);
        Ok(())
    }

    async fn update_item(&self, req: UpdateRequest) -> StoreResult<Option<Item>> {
        let mut tables = self.tables.write();
        let now = now_secs();
        let current = Self::live_item(tables.get(&req.table), &req.key, now);
        if !conditions_hold(Some(&req.expression), current.as_ref())? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        let updated = apply_updates(&req.expression, &req.key, current.clone())?;
        tables
            .entry(req.table)
            .or_default()
            .insert(req.key, updated.attributes.clone());
        Ok(match req.return_values {
            ReturnValues::None => None,
            ReturnValues::AllOld => current,
            ReturnValues::AllNew => Some(updated),
        })
    }

    async fn delete_item(&self, req: DeleteRequest) -> StoreResult<Option<Item>> {
        let mut tables = self.tables.write();
        let now = now_secs();
        let current = Self::live_item(tables.get(&req.table), &req.key, now);
        if !conditions_hold(req.expression.as_ref(), current.as_ref())? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        if let Some(table) = tables.get_mut(&req.table) {
            table.remove(&req.key);
        }
        Ok(if req.return_old { current } else { None })
    }

    async fn query(&self, req: QueryRequest) -> StoreResult<QueryPage> {
        if req.limit == Some(0) {
            return Err(StoreError::Validation("Limit must be greater than or equal to 1".to_string()));
        }
        let tables = self.tables.read();
        let Some(table) = tables.get(&req.table) else {
            return Ok(QueryPage::default());
        };
        let now = now_secs();

        let start = ItemKey::new(req.partition.clone(), String::new());
        let mut matched: Vec<(&ItemKey, &Attributes)> = table
            .range(start..)
            .take_while(|(k, _)| k.partition == req.partition)
            .filter(|(k, a)| req.sort.matches(&k.sort) && is_live(a, now))
            .collect();
        if !req.forward {
            matched.reverse();
        }
        if let Some(cursor) = &req.cursor {
            let last = cursor.last_key();
            matched.retain(|(k, _)| if req.forward { *k > last } else { *k < last });
        }

        let limit = req.limit.unwrap_or(usize::MAX).min(self.options.page_size.max(1));
        let more = matched.len() > limit;
        matched.truncate(limit);
        let cursor = if more {
            matched.last().map(|(k, _)| Cursor::new((*k).clone()))
        } else {
            None
        };

        let count = matched.len();
        let items = match req.select {
            Select::Items => matched
                .into_iter()
                .map(|(k, a)| Item {
                    key: k.clone(),
                    attributes: a.clone(),
                })
                .collect(),
            Select::Count => Vec::new(),
        };
        Ok(QueryPage { items, count, cursor })
    }

    async fn batch_write(&self, table: &str, mut writes: Vec<WriteRequest>) -> StoreResult<Vec<WriteRequest>> {
        if writes.is_empty() || writes.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::Validation(format!(
                "Batch write must contain between 1 and {} requests, got {}",
                MAX_BATCH_WRITE_ITEMS,
                writes.len()
            )));
        }
        ensure_unique_keys(writes.iter().map(WriteRequest::key))?;

        let capacity = self.options.batch_capacity.unwrap_or(writes.len());
        let unprocessed = writes.split_off(capacity.min(writes.len()));

        let mut tables = self.tables.write();
        let target = tables.entry(table.to_string()).or_default();
        for write in writes {
            match write {
                WriteRequest::Put(item) => {
                    target.insert(item.key, item.attributes);
                }
                WriteRequest::Delete(key) => {
                    target.remove(&key);
                }
            }
        }
        Ok(unprocessed)
    }

    async fn transact_write(&self, actions: Vec<TransactAction>) -> StoreResult<()> {
        if actions.is_empty() || actions.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::Validation(format!(
                "Transaction must contain between 1 and {} actions, got {}",
                MAX_TRANSACT_ITEMS,
                actions.len()
            )));
        }
        ensure_unique_keys(actions.iter().map(TransactAction::key))?;

        let mut tables = self.tables.write();
        let now = now_secs();

        // 先对所有动作求值，全部满足才落盘
        let mut reasons = Vec::with_capacity(actions.len());
        let mut currents = Vec::with_capacity(actions.len());
        for action in &actions {
            let current = Self::live_item(tables.get(action.table()), action.key(), now);
            let expr = match action {
                TransactAction::Put(req) => req.expression.as_ref(),
                TransactAction::Update(req) => Some(&req.expression),
                TransactAction::Delete(req) => req.expression.as_ref(),
                TransactAction::ConditionCheck { expression, .. } => Some(expression),
            };
            let ok = conditions_hold(expr, current.as_ref())?;
            reasons.push(if ok { "None" } else { "ConditionalCheckFailed" }.to_string());
            currents.push(current);
        }
        if reasons.iter().any(|r| r != "None") {
            debug!("Transaction canceled: {:?}", reasons);
            return Err(StoreError::TransactionCanceled { reasons });
        }

        // 更新动作需要先算出新镜像，出错时不能留下半个事务
        let mut writes = Vec::with_capacity(actions.len());
        for (action, current) in actions.into_iter().zip(currents) {
            match action {
                TransactAction::Put(req) => writes.push((req.table, req.item.key, Some(req.item.attributes))),
                TransactAction::Update(req) => {
                    let updated = apply_updates(&req.expression, &req.key, current)?;
                    writes.push((req.table, req.key, Some(updated.attributes)));
                }
                TransactAction::Delete(req) => writes.push((req.table, req.key, None)),
                TransactAction::ConditionCheck { .. } => {}
            }
        }
        for (table, key, attributes) in writes {
            let target = tables.entry(table).or_default();
            match attributes {
                Some(attributes) => {
                    target.insert(key, attributes);
                }
                None => {
                    target.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn transact_get(&self, table: &str, keys: &[ItemKey]) -> StoreResult<Vec<Option<Item>>> {
        if keys.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::Validation(format!(
                "Transaction must contain at most {} keys, got {}",
                MAX_TRANSACT_ITEMS,
                keys.len()
            )));
        }
        let tables = self.tables.read();
        let now = now_secs();
        Ok(keys
            .iter()
            .map(|key| Self::live_item(tables.get(table), key, now))
            .collect())
    }
}
