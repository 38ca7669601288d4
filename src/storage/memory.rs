// 内存存储：按 handle 建索引并保留写入顺序，用于测试与无数据库部署。
use crate::storage::{ProfileRecord, ProfileStore};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct MemoryState {
    records: Vec<ProfileRecord>,
    index: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<MemoryState>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfileStore for MemoryProfileStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<ProfileRecord>> {
        Ok(self.state.lock().records.clone())
    }

    fn upsert_by_handle(&self, record: &ProfileRecord) -> Result<ProfileRecord> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(&slot) = state.index.get(&record.handle) {
            let existing = &mut state.records[slot];
            let merged = ProfileRecord {
                id: existing.id.clone(),
                created_at: existing.created_at,
                ..record.clone()
            };
            *existing = merged.clone();
            return Ok(merged);
        }
        state
            .index
            .insert(record.handle.clone(), state.records.len());
        state.records.push(record.clone());
        Ok(record.clone())
    }
}
