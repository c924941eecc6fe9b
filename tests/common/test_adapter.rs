// test_adapter.rs
use std::sync::Arc;

use dynaredis::{Adapter, AdapterOptions, MemoryItemStore, MemoryStoreOptions};

/// 测试用的适配层：内存后端 + 很小的分页，保证多页路径被走到
pub struct TestAdapter {
    pub adapter: Adapter,
    pub store: Arc<MemoryItemStore>,
}

impl TestAdapter {
    pub fn new() -> Self {
        Self::with_store_options(MemoryStoreOptions {
            page_size: 3,
            ..Default::default()
        })
    }

    pub fn with_store_options(store_options: MemoryStoreOptions) -> Self {
        Self::build(store_options, AdapterOptions {
            batch_backoff_ms: 0,
            ..Default::default()
        })
    }

    pub fn build(store_options: MemoryStoreOptions, options: AdapterOptions) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let store = Arc::new(MemoryItemStore::with_options(store_options));
        let adapter = Adapter::new(store.clone(), options);
        Self { adapter, store }
    }

    pub fn items(&self) -> usize {
        self.store.len(&self.adapter.options().table_name)
    }
}
