//! 批量写
//!
//! 提交一组互不相关的无条件写。后端可能只接受其中一部分，剩余部分作为
//! “未处理”返回；这里只重发未处理的子集，直到全部完成或连续多轮毫无进展。
//! 不保证条目间的顺序和原子性。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AdapterError, AdapterResult};
use crate::store::{ItemStore, WriteRequest};

/// 后端单次批量写上限
pub const MAX_BATCH_CHUNK: usize = 25;

/// 退避指数上限
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// 确认写入的请求数
    pub written: usize,
    /// 向后端提交的轮数
    pub rounds: u32,
}

#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn ItemStore>,
    table: String,
    chunk_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            chunk_size: MAX_BATCH_CHUNK,
            max_attempts: 8,
            backoff_base: Duration::from_millis(20),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_BATCH_CHUNK);
        self
    }

    /// 连续无进展的最大轮数
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, stalls: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let exp = base.saturating_mul(1 << stalls.min(MAX_BACKOFF_SHIFT));
        Duration::from_millis(exp + rand::random_range(0..=base))
    }

    /// 写入全部请求
    ///
    /// 后端硬错误立即返回，此时已提交部分的状态未知。
    pub async fn write_all(&self, writes: Vec<WriteRequest>) -> AdapterResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let total = writes.len();
        let mut queue = writes.into_iter();

        loop {
            let mut pending: Vec<WriteRequest> = queue.by_ref().take(self.chunk_size).collect();
            if pending.is_empty() {
                break;
            }
            let mut stalls = 0u32;

            while !pending.is_empty() {
                let attempted = pending.len();
                let unprocessed = self.store.batch_write(&self.table, pending).await?;
                outcome.rounds += 1;

                let accepted = attempted - unprocessed.len().min(attempted);
                outcome.written += accepted;
                debug!(
                    "batch round {}: {} accepted, {} unprocessed",
                    outcome.rounds,
                    accepted,
                    unprocessed.len()
                );

                if unprocessed.is_empty() {
                    break;
                }
                if accepted == 0 {
                    stalls += 1;
                    if stalls >= self.max_attempts {
                        let pending = unprocessed.len() + queue.len();
                        warn!(
                            "batch write gave up after {} rounds without progress, {} of {} pending",
                            stalls, pending, total
                        );
                        return Err(AdapterError::RetriesExhausted {
                            attempts: stalls,
                            pending,
                        });
                    }
                } else {
                    stalls = 0;
                }
                tokio::time::sleep(self.backoff(stalls)).await;
                pending = unprocessed;
            }
        }
        Ok(outcome)
    }
}
