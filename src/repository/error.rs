// ==========================================
// 表格导入管道 - 记录仓储错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分级:
// - Unavailable: 连接/锁不可用 → 整次导入终止
// - 其余: 行级错误, 记录后继续
// ==========================================

use thiserror::Error;

/// 记录仓储错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    // ===== 连接与事务 =====
    #[error("记录仓储不可用: {0}")]
    Unavailable(String),

    #[error("事务提交失败: {0}")]
    CommitFailed(String),

    // ===== 结构错误 =====
    #[error("未知字段: {entity}.{field}")]
    UnknownField { entity: String, field: String },

    #[error("字段不可写: {entity}.{field}")]
    FieldNotWritable { entity: String, field: String },

    #[error("无效的记录句柄: {0}")]
    InvalidHandle(usize),

    #[error("无效的实体结构: {0}")]
    InvalidSchema(String),

    // ===== 数据库错误 =====
    #[error("数据库查询失败: {0}")]
    QueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },
}

impl StoreError {
    /// 致命错误: 整次导入无法继续
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let msg = msg.unwrap_or_else(|| e.to_string());
                match e.code {
                    rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::NotADatabase => StoreError::Unavailable(msg),
                    _ if msg.contains("UNIQUE") => StoreError::UniqueConstraintViolation(msg),
                    _ => StoreError::QueryError(msg),
                }
            }
            _ => StoreError::QueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type StoreResult<T> = Result<T, StoreError>;
