//! 表达式构建
//!
//! 为单个请求累积条件子句与更新子句。属性名和字面值都通过占位符引用
//! （`#n0`、`:v0`），同一个名字或同一个值重复登记只会得到同一个占位符。

use std::collections::BTreeMap;
use std::fmt;

use crate::value::{AttributeType, AttributeValue};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }
}

/// 条件子句；字段均为占位符
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists(String),
    NotExists(String),
    Compare {
        name: String,
        op: Comparator,
        value: String,
    },
    HasType {
        name: String,
        value: String,
    },
    Or(Vec<Condition>),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Exists(name) => write!(f, "attribute_exists({})", name),
            Condition::NotExists(name) => write!(f, "attribute_not_exists({})", name),
            Condition::Compare { name, op, value } => {
                write!(f, "{} {} {}", name, op.as_str(), value)
            }
            Condition::HasType { name, value } => write!(f, "attribute_type({}, {})", name, value),
            Condition::Or(parts) => {
                let parts: Vec<String> = parts.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(" OR "))
            }
        }
    }
}

/// 更新子句；字段均为占位符
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Set { name: String, value: String },
    SetIfNotExists { name: String, value: String },
    Add { name: String, value: String },
    Remove { name: String },
}

impl UpdateAction {
    fn verb(&self) -> &'static str {
        match self {
            UpdateAction::Set { .. } | UpdateAction::SetIfNotExists { .. } => "SET",
            UpdateAction::Add { .. } => "ADD",
            UpdateAction::Remove { .. } => "REMOVE",
        }
    }

    fn clause(&self) -> String {
        match self {
            UpdateAction::Set { name, value } => format!("{} = {}", name, value),
            UpdateAction::SetIfNotExists { name, value } => {
                format!("{} = if_not_exists({}, {})", name, name, value)
            }
            UpdateAction::Add { name, value } => format!("{} {}", name, value),
            UpdateAction::Remove { name } => name.clone(),
        }
    }
}

/// 构建完成的表达式，随请求一起交给后端
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    pub conditions: Vec<Condition>,
    pub updates: Vec<UpdateAction>,
    /// 占位符 -> 属性名
    pub names: BTreeMap<String, String>,
    /// 占位符 -> 字面值
    pub values: BTreeMap<String, AttributeValue>,
}

impl Expression {
    /// 条件文本；没有条件时为 None
    pub fn condition_text(&self) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
        Some(parts.join(" AND "))
    }

    /// 更新文本，按动词分组；没有更新时为 None
    pub fn update_text(&self) -> Option<String> {
        let mut groups: Vec<(&'static str, Vec<String>)> = Vec::new();
        for action in &self.updates {
            match groups.iter_mut().find(|(verb, _)| *verb == action.verb()) {
                Some((_, clauses)) => clauses.push(action.clause()),
                None => groups.push((action.verb(), vec![action.clause()])),
            }
        }
        if groups.is_empty() {
            return None;
        }
        let text: Vec<String> = groups
            .into_iter()
            .map(|(verb, clauses)| format!("{} {}", verb, clauses.join(", ")))
            .collect();
        Some(text.join(" "))
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn name(&self, placeholder: &str) -> Option<&str> {
        self.names.get(placeholder).map(String::as_str)
    }

    pub fn value(&self, placeholder: &str) -> Option<&AttributeValue> {
        self.values.get(placeholder)
    }
}

/// 单请求表达式构建器，每个请求新建一个
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    conditions: Vec<Condition>,
    updates: Vec<UpdateAction>,
    /// 属性名 -> 占位符
    names: BTreeMap<String, String>,
    /// (字面值, 占位符)，按登记顺序
    values: Vec<(AttributeValue, String)>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记属性名，返回其占位符
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(placeholder) = self.names.get(attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    /// 登记字面值，返回其占位符
    pub fn value(&mut self, value: AttributeValue) -> String {
        if let Some((_, placeholder)) = self.values.iter().find(|(v, _)| *v == value) {
            return placeholder.clone();
        }
        let placeholder = format!(":v{}", self.values.len());
        self.values.push((value, placeholder.clone()));
        placeholder
    }

    // ==================== 条件 ====================

    pub fn exists(&mut self, attribute: &str) -> Condition {
        Condition::Exists(self.name(attribute))
    }

    pub fn not_exists(&mut self, attribute: &str) -> Condition {
        Condition::NotExists(self.name(attribute))
    }

    pub fn compare(&mut self, attribute: &str, op: Comparator, value: AttributeValue) -> Condition {
        Condition::Compare {
            name: self.name(attribute),
            op,
            value: self.value(value),
        }
    }

    pub fn has_type(&mut self, attribute: &str, ty: AttributeType) -> Condition {
        Condition::HasType {
            name: self.name(attribute),
            value: self.value(AttributeValue::string(ty.as_str())),
        }
    }

    /// 追加一个与其他条件 AND 的子句
    pub fn when(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    /// 追加一个 OR 组
    pub fn when_any(&mut self, conditions: Vec<Condition>) -> &mut Self {
        match conditions.len() {
            0 => {}
            1 => self.conditions.extend(conditions),
            _ => self.conditions.push(Condition::Or(conditions)),
        }
        self
    }

    // ==================== 更新 ====================

    pub fn set(&mut self, attribute: &str, value: AttributeValue) -> &mut Self {
        let action = UpdateAction::Set {
            name: self.name(attribute),
            value: self.value(value),
        };
        self.updates.push(action);
        self
    }

    pub fn set_if_not_exists(&mut self, attribute: &str, value: AttributeValue) -> &mut Self {
        let action = UpdateAction::SetIfNotExists {
            name: self.name(attribute),
            value: self.value(value),
        };
        self.updates.push(action);
        self
    }

    pub fn add(&mut self, attribute: &str, value: AttributeValue) -> &mut Self {
        let action = UpdateAction::Add {
            name: self.name(attribute),
            value: self.value(value),
        };
        self.updates.push(action);
        self
    }

    pub fn remove(&mut self, attribute: &str) -> &mut Self {
        let action = UpdateAction::Remove {
            name: self.name(attribute),
        };
        self.updates.push(action);
        self
    }

    pub fn condition_expression(&self) -> Option<String> {
        self.snapshot().condition_text()
    }

    pub fn update_expression(&self) -> Option<String> {
        self.snapshot().update_text()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.updates.is_empty()
    }

    fn snapshot(&self) -> Expression {
        Expression {
            conditions: self.conditions.clone(),
            updates: self.updates.clone(),
            ..Default::default()
        }
    }

    pub fn build(self) -> Expression {
        Expression {
            conditions: self.conditions,
            updates: self.updates,
            names: self
                .names
                .into_iter()
                .map(|(name, placeholder)| (placeholder, name))
                .collect(),
            values: self
                .values
                .into_iter()
                .map(|(value, placeholder)| (placeholder, value))
                .collect(),
        }
    }
}
