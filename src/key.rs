//! 复合键编码
//!
//! 一个 Redis 键对应一个分区（partition），集合内的字段/成员对应排序键（sort）。
//!
//! 排序键一律带一个单字符命名空间标签：用户输入只会出现在 `f#`、`m#` 等标签之后，
//! 内部哨兵统一使用 `@` 开头，因此任何用户字符串都不可能与哨兵或其他结构的条目冲突。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 后端属性名常量表
pub mod attr {
    /// 分区键
    pub const PK: &str = "pk";
    /// 排序键
    pub const SK: &str = "sk";
    /// 条目所属的数据结构
    pub const KIND: &str = "kind";
    /// 标量值 / 字段值 / 列表元素
    pub const VALUE: &str = "val";
    /// 有序集合分数（有序编码后的字符串）
    pub const SCORE: &str = "score";
    /// 有序集合索引条目指向的成员
    pub const MEMBER: &str = "member";
    /// 过期时间（unix 秒），由后端负责清理
    pub const TTL: &str = "ttl";
    /// 流中最后一个 ID
    pub const LAST_ID: &str = "last";
    /// 流长度
    pub const LENGTH: &str = "len";
    /// 流条目字段
    pub const FIELDS: &str = "fields";
    /// 列表头（含）
    pub const HEAD: &str = "head";
    /// 列表尾（不含）
    pub const TAIL: &str = "tail";
}

/// 条目种类判别属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    String,
    Hash,
    Set,
    ZSet,
    ZIndex,
    List,
    Stream,
    Meta,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Hash => "hash",
            Kind::Set => "set",
            Kind::ZSet => "zset",
            Kind::ZIndex => "zindex",
            Kind::List => "list",
            Kind::Stream => "stream",
            Kind::Meta => "meta",
        }
    }

    pub fn parse(s: &str) -> Option<Kind> {
        Some(match s {
            "string" => Kind::String,
            "hash" => Kind::Hash,
            "set" => Kind::Set,
            "zset" => Kind::ZSet,
            "zindex" => Kind::ZIndex,
            "list" => Kind::List,
            "stream" => Kind::Stream,
            "meta" => Kind::Meta,
            _ => return None,
        })
    }
}

/// 用户数据所在的排序键命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// hash 字段
    Field,
    /// set 成员
    Member,
    /// 有序集合成员
    ZMember,
    /// 有序集合分数索引
    ZScore,
    /// 列表元素
    ListElem,
    /// 流条目
    StreamEntry,
}

impl Tag {
    pub fn prefix(&self) -> &'static str {
        match self {
            Tag::Field => "f#",
            Tag::Member => "m#",
            Tag::ZMember => "z#",
            Tag::ZScore => "s#",
            Tag::ListElem => "l#",
            Tag::StreamEntry => "x#",
        }
    }
}

/// 内部哨兵排序键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// 字符串的整体值
    Value,
    /// 流的序号计数器
    Sequence,
    /// 列表的头尾计数器
    List,
    /// 集合类键的整体过期时间
    Ttl,
}

impl Sentinel {
    pub fn sort_key(&self) -> &'static str {
        match self {
            Sentinel::Value => "@value",
            Sentinel::Sequence => "@seq",
            Sentinel::List => "@list",
            Sentinel::Ttl => "@ttl",
        }
    }
}

/// 条目地址：(partition, sort)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    pub fn sentinel(partition: &str, sentinel: Sentinel) -> Self {
        Self::new(partition, sentinel.sort_key())
    }

    /// 字符串整体值所在的条目
    pub fn scalar(partition: &str) -> Self {
        Self::sentinel(partition, Sentinel::Value)
    }

    pub fn tagged(partition: &str, tag: Tag, member: &str) -> Self {
        Self::new(partition, format!("{}{}", tag.prefix(), member))
    }

    /// 还原用户部分；标签不符时返回 None
    pub fn member(&self, tag: Tag) -> Option<&str> {
        self.sort.strip_prefix(tag.prefix())
    }

    pub fn is_sentinel(&self) -> bool {
        self.sort.starts_with('@')
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}
