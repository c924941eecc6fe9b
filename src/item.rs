//! 存储条目

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::{attr, ItemKey, Kind};
use crate::value::{AttributeValue, Value};

pub type Attributes = BTreeMap<String, AttributeValue>;

/// 后端中的一个条目：地址 + 非键属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: Attributes,
}

impl Item {
    pub fn new(key: ItemKey, kind: Kind) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(attr::KIND.to_string(), AttributeValue::string(kind.as_str()));
        Self { key, attributes }
    }

    pub fn with(mut self, name: &str, value: AttributeValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_value(self, value: &Value) -> Self {
        self.with(attr::VALUE, value.encode())
    }

    /// 打上截止时间（unix 秒）；None 时不变
    pub fn with_expiry(self, deadline: Option<i64>) -> Self {
        match deadline {
            Some(deadline) => self.with(attr::TTL, AttributeValue::number(deadline)),
            None => self,
        }
    }

    /// 读取属性；键属性（pk / sk）来自地址本身
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        match name {
            attr::PK => Some(AttributeValue::S(self.key.partition.clone())),
            attr::SK => Some(AttributeValue::S(self.key.sort.clone())),
            _ => self.attributes.get(name).cloned(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn kind(&self) -> Option<Kind> {
        self.attribute(attr::KIND)
            .and_then(AttributeValue::as_str)
            .and_then(Kind::parse)
    }

    pub fn value(&self) -> Value {
        Value::decode(self.attribute(attr::VALUE))
    }

    /// TTL 截止时间（unix 秒）
    pub fn expires_at(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;
        self.attribute(attr::TTL)
            .and_then(AttributeValue::as_decimal)
            .and_then(|d| d.to_i64())
    }
}
