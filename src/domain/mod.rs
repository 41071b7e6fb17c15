// ==========================================
// 表格导入管道 - 领域模型层
// ==========================================
// 职责: 定义导入参数/结果、目标实体元数据、标量类型
// 红线: 不含数据访问逻辑,不含解析逻辑
// ==========================================

pub mod import;
pub mod schema;
pub mod types;

// 重导出核心类型
pub use import::{FieldMap, ImportParameter, ImportReport, ImportRule, RowError, DEFAULT_BATCH_SIZE};
pub use schema::{EntityMetadata, EntitySchema, EnumType, FieldDescriptor, FieldType};
pub use types::{ImportMode, ParsedRow, Value};
