// ==========================================
// 表格导入管道 - 内存记录仓储
// ==========================================
// 用途: 测试替身 / 预演导入（不落库）
// 特性: 可注入第 N 次提交失败, 用于验证批次提交语义
// ==========================================

use crate::domain::schema::EntitySchema;
use crate::domain::types::Value;
use crate::repository::error::{StoreError, StoreResult};
use crate::repository::record_store::{
    lookup_field, writable_field, RecordHandle, RecordSession, RecordStore, StoredRecord,
    WorkingRecord,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<String, Vec<StoredRecord>>,
    next_id: i64,
    commit_calls: usize,
    fail_on_commit: Option<usize>, // 第 N 次提交失败（1 起）
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

// ==========================================
// MemoryRecordStore
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("锁获取失败: {}", e)))
    }

    /// 直接写入一条已提交记录（未给出的字段取类型零值）
    pub fn seed(&self, schema: &EntitySchema, values: Vec<(&str, Value)>) -> StoreResult<i64> {
        let mut record = WorkingRecord::new_for(schema);
        for (field, value) in values {
            writable_field(schema, field)?;
            record.values.insert(field.to_string(), value);
        }

        let mut state = self.lock()?;
        let id = state.allocate_id();
        state
            .entities
            .entry(schema.name.clone())
            .or_default()
            .push(StoredRecord {
                id,
                values: record.values,
            });
        Ok(id)
    }

    /// 读取实体的全部已提交记录（按 id 顺序）
    pub fn records(&self, entity: &str) -> StoreResult<Vec<StoredRecord>> {
        let state = self.lock()?;
        Ok(state.entities.get(entity).cloned().unwrap_or_default())
    }

    /// 令第 n 次 commit 调用失败
    pub fn fail_on_commit(&self, n: usize) -> StoreResult<()> {
        self.lock()?.fail_on_commit = Some(n);
        Ok(())
    }

    /// 已发生的 commit 调用次数（含失败）
    pub fn commit_calls(&self) -> StoreResult<usize> {
        Ok(self.lock()?.commit_calls)
    }
}

impl RecordStore for MemoryRecordStore {
    type Session = MemorySession;

    fn open_session(&self, schema: &EntitySchema) -> StoreResult<MemorySession> {
        // 提前验证锁可用
        drop(self.lock()?);
        Ok(MemorySession {
            store: self.clone(),
            schema: schema.clone(),
            working: Vec::new(),
        })
    }
}

// ==========================================
// MemorySession
// ==========================================
pub struct MemorySession {
    store: MemoryRecordStore,
    schema: EntitySchema,
    working: Vec<WorkingRecord>,
}

impl MemorySession {
    fn working_mut(&mut self, handle: RecordHandle) -> StoreResult<&mut WorkingRecord> {
        self.working
            .get_mut(handle.0)
            .ok_or(StoreError::InvalidHandle(handle.0))
    }
}

impl RecordSession for MemorySession {
    fn create(&mut self) -> StoreResult<RecordHandle> {
        self.working.push(WorkingRecord::new_for(&self.schema));
        Ok(RecordHandle(self.working.len() - 1))
    }

    fn find_one(&mut self, field: &str, value: &Value) -> StoreResult<Option<RecordHandle>> {
        let descriptor = lookup_field(&self.schema, field)?.clone();
        if value.is_null() {
            return Ok(None);
        }

        // 1. 本会话未提交记录
        if let Some(idx) = self
            .working
            .iter()
            .position(|r| r.matches(&descriptor, value))
        {
            return Ok(Some(RecordHandle(idx)));
        }

        // 2. 已提交记录（跳过已载入工作集的）
        let loaded: Vec<i64> = self.working.iter().filter_map(|r| r.id).collect();
        let found = {
            let state = self.store.lock()?;
            state.entities.get(&self.schema.name).and_then(|records| {
                records
                    .iter()
                    .filter(|r| !loaded.contains(&r.id))
                    .find(|r| WorkingRecord::loaded((*r).clone()).matches(&descriptor, value))
                    .cloned()
            })
        };

        Ok(found.map(|record| {
            self.working.push(WorkingRecord::loaded(record));
            RecordHandle(self.working.len() - 1)
        }))
    }

    fn set_value(&mut self, record: RecordHandle, field: &str, value: Value) -> StoreResult<()> {
        let name = writable_field(&self.schema, field)?.name.clone();
        let working = self.working_mut(record)?;
        working.values.insert(name, value);
        working.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<usize> {
        let pending: Vec<WorkingRecord> = std::mem::take(&mut self.working)
            .into_iter()
            .filter(|r| r.dirty)
            .collect();

        let mut state = self.store.lock()?;
        state.commit_calls += 1;
        if state.fail_on_commit == Some(state.commit_calls) {
            return Err(StoreError::CommitFailed(format!(
                "第 {} 次提交被注入失败",
                state.commit_calls
            )));
        }

        let count = pending.len();
        for record in pending {
            let id = match record.id {
                Some(id) => id,
                None => state.allocate_id(),
            };
            let records = state.entities.entry(self.schema.name.clone()).or_default();
            let stored = StoredRecord {
                id,
                values: record.values,
            };
            match records.iter_mut().find(|r| r.id == id) {
                Some(existing) => *existing = stored,
                None => records.push(stored),
            }
        }
        Ok(count)
    }
}
