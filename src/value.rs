//! 值编解码
//!
//! `Value` 是适配层看到的标量值；`AttributeValue` 是后端存储的类型化属性。
//! 两者之间的映射是无损的：数值始终经由十进制文本往返，不经过二进制浮点。

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 后端类型化属性（每个属性只填充一个槽位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// 二进制
    B(Vec<u8>),
    /// 字符串
    S(String),
    /// 数值（十进制文本）
    N(String),
    /// 列表
    L(Vec<AttributeValue>),
    /// 空
    Null,
}

impl AttributeValue {
    /// 属性类型标记，对应条件表达式中的 `attribute_type`
    pub fn type_tag(&self) -> AttributeType {
        match self {
            AttributeValue::B(_) => AttributeType::Binary,
            AttributeValue::S(_) => AttributeType::String,
            AttributeValue::N(_) => AttributeType::Number,
            AttributeValue::L(_) => AttributeType::List,
            AttributeValue::Null => AttributeType::Null,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            AttributeValue::N(n) => Decimal::from_str(n).ok(),
            _ => None,
        }
    }

    pub fn number(n: impl Into<Decimal>) -> Self {
        AttributeValue::N(n.into().to_string())
    }

    pub fn string(s: impl Into<String>) -> Self {
        AttributeValue::S(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Binary,
    String,
    Number,
    List,
    Null,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Binary => "B",
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::List => "L",
            AttributeType::Null => "NULL",
        }
    }
}

/// 标量值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Numeric(Decimal),
    Absent,
}

impl Value {
    /// 把客户端传入的字节归类：规范整数存为数值（以便原子 ADD），
    /// 合法 UTF-8 存为文本，其余存为二进制
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => match canonical_integer(&text) {
                Some(n) => Value::Numeric(n),
                None => Value::Text(text),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }

    /// 还原为客户端可见的字节
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b.clone()),
            Value::Text(s) => Some(s.clone().into_bytes()),
            Value::Numeric(n) => Some(n.to_string().into_bytes()),
            Value::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// 解释为十进制数（文本形式的数字也接受）
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Numeric(n) => Some(*n),
            Value::Text(s) => Decimal::from_str(s).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok().and_then(|s| Decimal::from_str(s).ok()),
            Value::Absent => None,
        }
    }

    pub fn encode(&self) -> AttributeValue {
        match self {
            Value::Bytes(b) => AttributeValue::B(b.clone()),
            Value::Text(s) => AttributeValue::S(s.clone()),
            Value::Numeric(n) => AttributeValue::N(n.to_string()),
            Value::Absent => AttributeValue::Null,
        }
    }

    /// 解码；缺失或无法识别的槽位得到 `Value::Absent`
    pub fn decode(attr: Option<&AttributeValue>) -> Self {
        match attr {
            Some(AttributeValue::B(b)) => Value::Bytes(b.clone()),
            Some(AttributeValue::S(s)) => Value::Text(s.clone()),
            Some(AttributeValue::N(n)) => match Decimal::from_str(n) {
                Ok(d) => Value::Numeric(d),
                Err(e) => {
                    warn!("Undecodable numeric attribute {:?}: {}", n, e);
                    Value::Absent
                }
            },
            Some(AttributeValue::L(_)) | Some(AttributeValue::Null) | None => Value::Absent,
        }
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Numeric(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// 只有文本与其十进制表示完全一致时才视为整数，保证 GET 读回原样字节
fn canonical_integer(text: &str) -> Option<Decimal> {
    let n = Decimal::from_str(text).ok()?;
    (n.scale() == 0 && n.to_string() == text).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_each_variant() {
        let values = vec![
            Value::Bytes(vec![0xff, 0x00, 0x10]),
            Value::Text("hello".to_string()),
            Value::Numeric(Decimal::from_str("-12345678901234567890.125").unwrap()),
            Value::Numeric(Decimal::from(0)),
            Value::Absent,
        ];
        for v in values {
            let encoded = v.encode();
            assert_eq!(Value::decode(Some(&encoded)), v);
        }
    }

    #[test]
    fn test_numeric_goes_through_text() {
        let n = Decimal::from_str("0.1").unwrap();
        assert_eq!(Value::Numeric(n).encode(), AttributeValue::N("0.1".to_string()));
    }

    #[test]
    fn test_decode_unrecognized_is_absent() {
        assert_eq!(Value::decode(None), Value::Absent);
        assert_eq!(Value::decode(Some(&AttributeValue::Null)), Value::Absent);
        assert_eq!(Value::decode(Some(&AttributeValue::L(vec![]))), Value::Absent);
        assert_eq!(
            Value::decode(Some(&AttributeValue::N("not-a-number".to_string()))),
            Value::Absent
        );
    }

    #[test]
    fn test_from_bytes_classification() {
        assert_eq!(Value::from_bytes(b"42".to_vec()), Value::Numeric(Decimal::from(42)));
        assert_eq!(Value::from_bytes(b"-7".to_vec()), Value::Numeric(Decimal::from(-7)));
        // 非规范写法保持文本，读回时字节不变
        assert_eq!(Value::from_bytes(b"007".to_vec()), Value::Text("007".to_string()));
        assert_eq!(Value::from_bytes(b"1.50".to_vec()), Value::Text("1.50".to_string()));
        assert_eq!(Value::from_bytes(vec![0xc3, 0x28]), Value::Bytes(vec![0xc3, 0x28]));

        let raws: [&[u8]; 4] = [b"42", b"007", b"world", &[0xc3, 0x28]];
        for raw in raws {
            assert_eq!(Value::from_bytes(raw.to_vec()).to_bytes(), Some(raw.to_vec()));
        }
    }
}
