// ==========================================
// 表格导入管道 - 记录仓储 Trait
// ==========================================
// 职责: 定义导入引擎所需的最小仓储契约（不包含实现）
// 契约:
// (a) 新建记录  (b) 按等值条件查找单条  (c) 按字段名写值
// (d) 提交自上次提交以来的全部变更（单次提交全有或全无）
// 红线: 会话由一次导入独占, 不与其他写入方交错
// ==========================================

use crate::domain::schema::{EntityMetadata, EntitySchema, FieldDescriptor};
use crate::domain::types::Value;
use crate::repository::error::{StoreError, StoreResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// 会话内记录句柄（仅在下一次提交前有效）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle(pub usize);

// ==========================================
// RecordSession Trait
// ==========================================
// 用途: 一次导入的写入会话
// 实现者: SqliteSession, MemorySession
pub trait RecordSession {
    /// 新建记录（字段以类型零值初始化）
    fn create(&mut self) -> StoreResult<RecordHandle>;

    /// 按 field = value 查找单条记录
    ///
    /// # 说明
    /// - 先查本会话未提交的记录, 再查已持久化记录
    /// - value 为 Null 时恒不命中
    fn find_one(&mut self, field: &str, value: &Value) -> StoreResult<Option<RecordHandle>>;

    /// 写入字段值
    ///
    /// # 返回
    /// - Err(UnknownField): 字段不存在
    /// - Err(FieldNotWritable): 字段只读或为标识字段
    fn set_value(&mut self, record: RecordHandle, field: &str, value: Value) -> StoreResult<()>;

    /// 提交自上次提交以来的全部变更
    ///
    /// # 返回
    /// - Ok(usize): 本次写入的记录数
    /// - Err: 本次变更全部丢弃, 之前已提交的批次不受影响
    fn commit(&mut self) -> StoreResult<usize>;
}

// ==========================================
// RecordStore Trait
// ==========================================
// 用途: 打开写入会话
// 实现者: SqliteRecordStore, MemoryRecordStore
pub trait RecordStore {
    type Session: RecordSession;

    /// 针对目标实体打开写入会话
    fn open_session(&self, schema: &EntitySchema) -> StoreResult<Self::Session>;
}

// ==========================================
// StoredRecord - 已持久化记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub values: BTreeMap<String, Value>,
}

impl StoredRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

// ==========================================
// 会话公共辅助
// ==========================================

/// 会话内工作记录
#[derive(Debug, Clone)]
pub(crate) struct WorkingRecord {
    pub id: Option<i64>, // None = 未提交的新记录
    pub values: BTreeMap<String, Value>,
    pub dirty: bool,
}

impl WorkingRecord {
    /// 以类型零值初始化的新记录
    pub fn new_for(schema: &EntitySchema) -> Self {
        let values = schema
            .fields
            .iter()
            .filter(|f| !f.key)
            .map(|f| (f.name.clone(), f.field_type.default_value()))
            .collect();
        Self {
            id: None,
            values,
            dirty: true,
        }
    }

    pub fn loaded(record: StoredRecord) -> Self {
        Self {
            id: Some(record.id),
            values: record.values,
            dirty: false,
        }
    }

    /// 字段值比较; 标识字段与记录 id 比较
    pub fn matches(&self, field: &FieldDescriptor, value: &Value) -> bool {
        if field.key {
            return match (self.id, value) {
                (Some(id), Value::Int(v)) => id == *v,
                _ => false,
            };
        }
        self.values.get(&field.name) == Some(value)
    }
}

/// 解析可写字段
pub(crate) fn writable_field<'a>(
    schema: &'a EntitySchema,
    field: &str,
) -> StoreResult<&'a FieldDescriptor> {
    let descriptor = lookup_field(schema, field)?;
    if descriptor.key || !descriptor.writable {
        return Err(StoreError::FieldNotWritable {
            entity: schema.name.clone(),
            field: field.to_string(),
        });
    }
    Ok(descriptor)
}

/// 解析任意字段（查询用）
pub(crate) fn lookup_field<'a>(
    schema: &'a EntitySchema,
    field: &str,
) -> StoreResult<&'a FieldDescriptor> {
    schema
        .find_field(field)
        .ok_or_else(|| StoreError::UnknownField {
            entity: schema.name.clone(),
            field: field.to_string(),
        })
}
