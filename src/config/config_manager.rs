// ==========================================
// 表格导入管道 - 配置管理器
// ==========================================
// 职责: 导入配置的加载、查询、覆写
// 存储: config_kv 表 (key-value + scope), scope_id = 'global'
// 键: import/<name> 为全局默认; import/<entity>/<name> 为实体级覆写
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::import::{ImportRule, DEFAULT_BATCH_SIZE};
use crate::domain::types::ImportMode;
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    // 全局默认
    pub const BATCH_SIZE: &str = "import/batch_size";
    pub const DEFAULT_MODE: &str = "import/default_mode";
    pub const MAX_RECORDS: &str = "import/max_records";
    pub const HAS_HEADERS: &str = "import/has_headers";
    pub const HEADER_ROW_INDEX: &str = "import/header_row_index";
    pub const DATA_START_ROW_INDEX: &str = "import/data_start_row_index";

    /// 实体级键: import/<entity>/<name>
    pub fn entity_key(entity: &str, name: &str) -> String {
        format!("import/{}/{}", entity, name)
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.ensure_schema()?;
        Ok(manager)
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let guard = lock(&conn)?;
            configure_sqlite_connection(&guard)?;
        }
        let manager = Self { conn };
        manager.ensure_schema()?;
        Ok(manager)
    }

    /// 创建 config_scope / config_kv 表并写入 global scope
    fn ensure_schema(&self) -> ImportResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_scope (
                scope_id TEXT PRIMARY KEY,
                scope_type TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(scope_type, scope_key)
            );
            INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
            VALUES ('global', 'GLOBAL', 'global');
            CREATE TABLE IF NOT EXISTS config_kv (
                scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (scope_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 写入配置值（已存在则覆盖）
    pub fn set_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        debug!(key, value, "配置已写入");
        Ok(())
    }

    /// 读取并解析配置值, 缺失时返回默认值
    fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> ImportResult<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    /// 读取实体级配置值
    ///
    /// # 返回
    /// - None: 实体级键未配置（调用方回退到全局默认值）
    fn get_entity_override<T: FromStr>(&self, entity: &str, name: &str) -> ImportResult<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        let entity_key = config_keys::entity_key(entity, name);
        self.get_config_value(&entity_key)?
            .map(|raw| parse_value(&entity_key, &raw))
            .transpose()
    }
}

fn lock(conn: &Arc<Mutex<Connection>>) -> ImportResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| ImportError::InternalError(format!("锁获取失败: {}", e)))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> ImportResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ImportError::ConfigValueError {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_default_batch_size(&self) -> ImportResult<usize> {
        self.get_parsed(config_keys::BATCH_SIZE, DEFAULT_BATCH_SIZE)
    }

    async fn get_default_import_mode(&self) -> ImportResult<ImportMode> {
        self.get_parsed(config_keys::DEFAULT_MODE, ImportMode::Insert)
    }

    async fn get_max_records_to_import(&self) -> ImportResult<usize> {
        self.get_parsed(config_keys::MAX_RECORDS, 0)
    }

    async fn get_has_headers(&self) -> ImportResult<bool> {
        self.get_parsed(config_keys::HAS_HEADERS, true)
    }

    async fn get_header_row_index(&self) -> ImportResult<usize> {
        self.get_parsed(config_keys::HEADER_ROW_INDEX, 0)
    }

    async fn get_data_start_row_index(&self) -> ImportResult<usize> {
        self.get_parsed(config_keys::DATA_START_ROW_INDEX, 1)
    }

    async fn get_import_rule(&self, entity: &str) -> ImportResult<ImportRule> {
        let mut rule = ImportRule::new(entity);
        rule.default_import_mode = match self.get_entity_override(entity, "default_mode")? {
            Some(mode) => mode,
            None => self.get_default_import_mode().await?,
        };
        rule.batch_size = match self.get_entity_override(entity, "batch_size")? {
            Some(batch_size) => batch_size,
            None => self.get_default_batch_size().await?,
        };
        if let Some(caption) = self.get_config_value(&config_keys::entity_key(entity, "caption"))? {
            rule.caption = caption;
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_manager() -> (NamedTempFile, ConfigManager) {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, manager)
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let (_tmp, manager) = create_manager();

        assert_eq!(manager.get_default_batch_size().await.unwrap(), 100);
        assert_eq!(manager.get_default_import_mode().await.unwrap(), ImportMode::Insert);
        assert_eq!(manager.get_max_records_to_import().await.unwrap(), 0);
        assert!(manager.get_has_headers().await.unwrap());
        assert_eq!(manager.get_header_row_index().await.unwrap(), 0);
        assert_eq!(manager.get_data_start_row_index().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entity_rule_overrides_global() {
        let (_tmp, manager) = create_manager();
        manager.set_config_value(config_keys::BATCH_SIZE, "50").unwrap();
        manager.set_config_value("import/Product/default_mode", "upsert").unwrap();
        manager.set_config_value("import/Product/caption", "Import products").unwrap();

        let rule = manager.get_import_rule("Product").await.unwrap();
        assert_eq!(rule.default_import_mode, ImportMode::Upsert);
        assert_eq!(rule.batch_size, 50);
        assert_eq!(rule.caption, "Import products");

        let other = manager.get_import_rule("Contact").await.unwrap();
        assert_eq!(other.default_import_mode, ImportMode::Insert);
        assert_eq!(other.caption, "Import Contact");
    }

    #[tokio::test]
    async fn test_import_rule_falls_back_to_global_defaults() {
        let (_tmp, manager) = create_manager();
        manager.set_config_value(config_keys::DEFAULT_MODE, "UPDATE").unwrap();
        manager.set_config_value(config_keys::BATCH_SIZE, "25").unwrap();
        manager.set_config_value("import/Product/batch_size", "10").unwrap();

        let rule = manager.get_import_rule("Product").await.unwrap();
        assert_eq!(rule.default_import_mode, manager.get_default_import_mode().await.unwrap());
        assert_eq!(rule.default_import_mode, ImportMode::Update);
        assert_eq!(rule.batch_size, 10);

        let other = manager.get_import_rule("Contact").await.unwrap();
        assert_eq!(other.batch_size, manager.get_default_batch_size().await.unwrap());
        assert_eq!(other.batch_size, 25);

        manager.set_config_value("import/Product/batch_size", "ten").unwrap();
        let err = manager.get_import_rule("Product").await.unwrap_err();
        assert!(matches!(err, ImportError::ConfigValueError { ref key, .. } if key == "import/Product/batch_size"));
    }

    #[tokio::test]
    async fn test_malformed_value_is_reported() {
        let (_tmp, manager) = create_manager();
        manager.set_config_value(config_keys::BATCH_SIZE, "many").unwrap();

        let err = manager.get_default_batch_size().await.unwrap_err();
        assert!(matches!(err, ImportError::ConfigValueError { ref key, .. } if key == "import/batch_size"));
    }

    #[test]
    fn test_set_value_overwrites() {
        let (_tmp, manager) = create_manager();
        manager.set_config_value("k", "1").unwrap();
        manager.set_config_value("k", "2").unwrap();
        assert_eq!(manager.get_config_value("k").unwrap().as_deref(), Some("2"));
        assert_eq!(manager.get_config_value("missing").unwrap(), None);
    }
}
