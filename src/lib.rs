// ==========================================
// 表格导入管道 - 核心库
// ==========================================
// 技术栈: Rust + calamine/csv + SQLite
// 定位: 表格文档（xlsx/xls/csv）→ 目标实体记录
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 导入参数/结果与实体元数据
pub mod domain;

// 数据仓储层 - 记录读写
pub mod repository;

// 导入层 - 解析/映射/转换/执行
pub mod importer;

// 配置层 - 导入默认值
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    EntityMetadata, EntitySchema, FieldDescriptor, FieldMap, FieldType, ImportMode,
    ImportParameter, ImportReport, RowError, Value,
};
pub use importer::{
    DataImporter, DataImporterImpl, FieldMapper, ImportError, ImportExecutor, ImportResult,
    TabularParser,
};
pub use repository::{MemoryRecordStore, RecordSession, RecordStore, SqliteRecordStore};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
