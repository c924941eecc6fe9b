use serde::{Deserialize, Serialize};

/// 适配层配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOptions {
    /// 后端表名
    pub table_name: String,
    /// 查询单页条目上限；None 交给后端决定
    pub page_size: Option<usize>,
    /// 读操作是否要求强一致
    pub consistent_reads: bool,
    /// 批量写每次提交的请求数（不超过 25）
    pub batch_chunk_size: usize,
    /// 批量写连续无进展的最大轮数
    pub batch_max_attempts: u32,
    /// 批量写重试退避基数（毫秒）
    pub batch_backoff_ms: u64,
    /// 流追加（自动 ID）遇到冲突时的最大重试次数
    pub stream_append_retries: u32,
    /// 乐观读-改-写（APPEND、ZADD 改分等）的最大重试次数
    pub optimistic_retries: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            table_name: "redis".to_string(),
            page_size: None,
            consistent_reads: true,
            batch_chunk_size: 25,
            batch_max_attempts: 8,
            batch_backoff_ms: 20,
            stream_append_retries: 16,
            optimistic_retries: 16,
        }
    }
}

impl AdapterOptions {
    pub fn with_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let opts: AdapterOptions =
            serde_json::from_str(r#"{"table_name": "cache", "page_size": 10}"#).unwrap();
        assert_eq!(opts.table_name, "cache");
        assert_eq!(opts.page_size, Some(10));
        assert_eq!(opts.batch_chunk_size, AdapterOptions::default().batch_chunk_size);
    }
}
