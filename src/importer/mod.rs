// ==========================================
// 表格导入管道 - 导入层
// ==========================================
// 职责: 表格文档 → 目标实体记录
// 支持: Excel (.xlsx/.xls), CSV
// 阶段: 解析 → 自动映射 → 类型转换 → 执行（按模式新建/更新, 分批提交）
// ==========================================

// 模块声明
pub mod data_importer;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod import_executor;
pub mod value_coercion;

// 重导出核心类型
pub use data_importer::{DataImporter, DataImporterImpl};
pub use error::{ImportError, ImportResult};
pub use field_mapper::FieldMapper;
pub use file_parser::{
    CsvReader, DocumentFormat, DocumentMetadata, DocumentReader, ExcelReader, SheetGrid,
    TabularParser, Workbook,
};
pub use import_executor::{ImportExecutor, RowOutcome};
pub use value_coercion::{coerce, ConversionError};
