// ==========================================
// 表格导入管道 - 数据仓储层
// ==========================================
// 红线: Repository 不含导入规则
// ==========================================
// 职责: 提供记录读写接口,屏蔽存储细节
// 约束: 所有值使用参数化绑定; 标识符经白名单校验
// ==========================================

pub mod error;
pub mod memory_record_store;
pub mod record_store;
pub mod sqlite_record_store;

// 重导出核心仓储
pub use error::{StoreError, StoreResult};
pub use memory_record_store::{MemoryRecordStore, MemorySession};
pub use record_store::{RecordHandle, RecordSession, RecordStore, StoredRecord};
pub use sqlite_record_store::{SqliteRecordStore, SqliteSession};
