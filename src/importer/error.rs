// ==========================================
// 表格导入管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 传播策略:
// - 行级错误（类型转换/主键未命中）在行边界转为 RowError
// - 行循环之外的错误（文档解析/会话打开/最终提交）直接返回调用方
// ==========================================

use crate::importer::value_coercion::ConversionError;
use crate::repository::error::StoreError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文档解析失败: {0}")]
    DocumentParseError(String),

    // ===== 配置错误 =====
    #[error("导入配置错误: {0}")]
    ConfigurationError(String),

    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== 行级错误 =====
    #[error("no existing object found for key '{key}'")]
    KeyResolutionError { key: String },

    #[error(transparent)]
    ConversionError(#[from] ConversionError),

    // ===== 仓储错误 =====
    #[error("批次提交失败 (行 {row}): {message}")]
    CommitError { row: usize, message: String },

    #[error("记录仓储错误: {0}")]
    StoreError(#[from] StoreError),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::DocumentParseError(format!("CSV: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::DocumentParseError(err.to_string())
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::DocumentParseError(format!("XLSX: {}", err))
    }
}

// 实现 From<calamine::XlsError>
impl From<calamine::XlsError> for ImportError {
    fn from(err: calamine::XlsError) -> Self {
        ImportError::DocumentParseError(format!("XLS: {}", err))
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::StoreError(StoreError::from(err))
    }
}

impl ImportError {
    /// 是否为行级错误（可记录后继续处理下一行）
    pub fn is_row_scoped(&self) -> bool {
        match self {
            ImportError::KeyResolutionError { .. } | ImportError::ConversionError(_) => true,
            ImportError::StoreError(e) => !e.is_fatal(),
            _ => false,
        }
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
