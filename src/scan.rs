//! 分页扫描
//!
//! 后端每次只返回有限的一页和一个续读游标；这里反复带着游标重发查询，
//! 直到游标为空，对调用方呈现为一次完整读取。

use std::sync::Arc;

use tracing::debug;

use crate::error::{ScanError, StoreResult};
use crate::item::Item;
use crate::store::{ItemStore, QueryPage, QueryRequest, Select};

pub struct PaginatedScan {
    store: Arc<dyn ItemStore>,
    request: QueryRequest,
    /// 跨页剩余额度
    remaining: Option<usize>,
    done: bool,
    pages: usize,
}

impl PaginatedScan {
    pub fn new(store: Arc<dyn ItemStore>, request: QueryRequest) -> Self {
        Self {
            store,
            request,
            remaining: None,
            done: false,
            pages: 0,
        }
    }

    /// 最多取 `count` 个条目（跨页累计）
    pub fn with_limit(mut self, count: Option<usize>) -> Self {
        self.remaining = count;
        self
    }

    /// 单页大小
    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.request.limit = page_size;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.request.forward = false;
        self
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// 读取下一页；已读完时返回 None
    async fn next_page(&mut self) -> Option<StoreResult<QueryPage>> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        let mut request = self.request.clone();
        if let Some(remaining) = self.remaining {
            request.limit = Some(request.limit.map_or(remaining, |l| l.min(remaining)));
        }

        let mut page = match self.store.query(request).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        self.pages += 1;

        if let Some(remaining) = self.remaining.as_mut() {
            page.items.truncate(*remaining);
            page.count = page.count.min(*remaining);
            *remaining -= page.count;
        }
        debug!(
            "scan {} page {}: {} items, more: {}",
            self.request.partition,
            self.pages,
            page.count,
            page.cursor.is_some()
        );
        match page.cursor.take() {
            Some(cursor) => self.request.cursor = Some(cursor),
            None => self.done = true,
        }
        Some(Ok(page))
    }

    /// 读完全部页，按页序累积
    pub async fn collect(mut self) -> Result<Vec<Item>, ScanError> {
        self.request.select = Select::Items;
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            match page {
                Ok(page) => items.extend(page.items),
                Err(source) => return Err(ScanError { partial: items, source }),
            }
        }
        Ok(items)
    }

    /// 只计数，不传输条目；出错时 `partial` 是出错前已数到的个数
    pub async fn count(mut self) -> Result<usize, ScanError<usize>> {
        self.request.select = Select::Count;
        let mut total = 0;
        while let Some(page) = self.next_page().await {
            match page {
                Ok(page) => total += page.count,
                Err(source) => return Err(ScanError { partial: total, source }),
            }
        }
        Ok(total)
    }

    /// 按页序折叠；出错时 `partial` 是出错前的累积值
    pub async fn fold<T, F>(mut self, init: T, mut f: F) -> Result<T, ScanError<T>>
    where
        F: FnMut(T, Item) -> T,
    {
        self.request.select = Select::Items;
        let mut acc = init;
        while let Some(page) = self.next_page().await {
            match page {
                Ok(page) => {
                    for item in page.items {
                        acc = f(acc, item);
                    }
                }
                Err(source) => return Err(ScanError { partial: acc, source }),
            }
        }
        Ok(acc)
    }
}
