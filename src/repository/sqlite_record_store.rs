// ==========================================
// 表格导入管道 - SQLite 记录仓储
// ==========================================
// 职责: 以 rusqlite 实现 RecordStore / RecordSession
// 表结构: 表名 = 实体名; 标识列 = 首个 key 字段（缺省为 id）
// 红线: 仓储不含导入规则, 只做记录读写
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::schema::{EntitySchema, FieldDescriptor, FieldType};
use crate::domain::types::Value;
use crate::repository::error::{StoreError, StoreResult};
use crate::repository::record_store::{
    lookup_field, writable_field, RecordHandle, RecordSession, RecordStore, StoredRecord,
    WorkingRecord,
};
use chrono::NaiveDateTime;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// DateTime 列的存储格式
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ==========================================
// SqliteRecordStore
// ==========================================
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// 创建新的仓储实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 复用已打开的连接
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    /// 按实体结构建表（已存在则跳过）
    pub fn ensure_table(&self, schema: &EntitySchema) -> StoreResult<()> {
        let layout = TableLayout::from_schema(schema)?;
        let conn = self.lock()?;
        conn.execute_batch(&layout.create_table_sql())?;
        Ok(())
    }

    /// 读取实体的全部记录（按标识列升序）
    pub fn fetch_all(&self, schema: &EntitySchema) -> StoreResult<Vec<StoredRecord>> {
        let layout = TableLayout::from_schema(schema)?;
        let conn = self.lock()?;
        let sql = format!(
            "{} ORDER BY \"{}\"",
            layout.select_sql(),
            layout.id_column
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(layout.read_row(row)?);
        }
        Ok(records)
    }
}

impl RecordStore for SqliteRecordStore {
    type Session = SqliteSession;

    fn open_session(&self, schema: &EntitySchema) -> StoreResult<SqliteSession> {
        self.ensure_table(schema)?;
        Ok(SqliteSession {
            conn: Arc::clone(&self.conn),
            schema: schema.clone(),
            layout: TableLayout::from_schema(schema)?,
            working: Vec::new(),
        })
    }
}

fn lock_conn(conn: &Arc<Mutex<Connection>>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Unavailable(format!("锁获取失败: {}", e)))
}

// ==========================================
// TableLayout - 实体到表的映射
// ==========================================
#[derive(Debug, Clone)]
struct TableLayout {
    table: String,
    id_column: String,
    columns: Vec<FieldDescriptor>, // 非标识字段（声明顺序）
}

impl TableLayout {
    fn from_schema(schema: &EntitySchema) -> StoreResult<Self> {
        validate_identifier(&schema.name)?;
        let id_column = schema
            .fields
            .iter()
            .find(|f| f.key)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "id".to_string());
        validate_identifier(&id_column)?;

        let columns: Vec<FieldDescriptor> =
            schema.fields.iter().filter(|f| !f.key).cloned().collect();
        for column in &columns {
            validate_identifier(&column.name)?;
            if column.name.eq_ignore_ascii_case(&id_column) {
                return Err(StoreError::InvalidSchema(format!(
                    "字段 {} 与标识列重名",
                    column.name
                )));
            }
        }

        Ok(Self {
            table: schema.name.clone(),
            id_column,
            columns,
        })
    }

    fn create_table_sql(&self) -> String {
        let mut defs = vec![format!(
            "\"{}\" INTEGER PRIMARY KEY AUTOINCREMENT",
            self.id_column
        )];
        defs.extend(
            self.columns
                .iter()
                .map(|c| format!("\"{}\" {}", c.name, sql_type(&c.field_type))),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.table,
            defs.join(", ")
        )
    }

    fn select_sql(&self) -> String {
        let mut names = vec![format!("\"{}\"", self.id_column)];
        names.extend(self.columns.iter().map(|c| format!("\"{}\"", c.name)));
        format!("SELECT {} FROM \"{}\"", names.join(", "), self.table)
    }

    fn insert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{}", i)).collect();
        if names.is_empty() {
            return format!("INSERT INTO \"{}\" DEFAULT VALUES", self.table);
        }
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    fn update_sql(&self) -> Option<String> {
        if self.columns.is_empty() {
            return None;
        }
        let sets: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("\"{}\" = ?{}", c.name, i + 1))
            .collect();
        Some(format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?{}",
            self.table,
            sets.join(", "),
            self.id_column,
            self.columns.len() + 1
        ))
    }

    fn column_values(&self, record: &WorkingRecord) -> Vec<SqlValue> {
        self.columns
            .iter()
            .map(|c| to_sql(record.values.get(&c.name).unwrap_or(&Value::Null)))
            .collect()
    }

    fn read_row(&self, row: &rusqlite::Row<'_>) -> StoreResult<StoredRecord> {
        let id: i64 = row.get(0)?;
        let mut values = BTreeMap::new();
        for (i, column) in self.columns.iter().enumerate() {
            let value = from_sql(&column.name, &column.field_type, row.get_ref(i + 1)?)?;
            values.insert(column.name.clone(), value);
        }
        Ok(StoredRecord { id, values })
    }
}

/// 标识符校验: [A-Za-z_][A-Za-z0-9_]*
fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSchema(format!("非法标识符: '{}'", name)))
    }
}

fn sql_type(field_type: &FieldType) -> &'static str {
    match field_type.underlying().0 {
        FieldType::Int32 | FieldType::Int64 | FieldType::Bool => "INTEGER",
        FieldType::Float64 => "REAL",
        _ => "TEXT",
    }
}

// ==========================================
// 值转换（Value ↔ SQLite）
// ==========================================

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) | Value::Enum(s) => SqlValue::Text(s.clone()),
        Value::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
        Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
    }
}

fn from_sql(field: &str, field_type: &FieldType, raw: ValueRef<'_>) -> StoreResult<Value> {
    let field_error = |message: String| StoreError::FieldValueError {
        field: field.to_string(),
        message,
    };

    let text = |bytes: &[u8]| -> StoreResult<String> {
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|e| field_error(e.to_string()))
    };

    let value = match (field_type.underlying().0, raw) {
        (_, ValueRef::Null) => Value::Null,
        (FieldType::Int32 | FieldType::Int64, ValueRef::Integer(i)) => Value::Int(i),
        (FieldType::Float64, ValueRef::Real(f)) => Value::Float(f),
        (FieldType::Float64, ValueRef::Integer(i)) => Value::Float(i as f64),
        (FieldType::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (FieldType::DateTime, ValueRef::Text(bytes)) => {
            let s = text(bytes)?;
            NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
                .map(Value::DateTime)
                .map_err(|e| field_error(format!("'{}': {}", s, e)))?
        }
        (FieldType::Uuid, ValueRef::Text(bytes)) => {
            let s = text(bytes)?;
            Uuid::parse_str(&s)
                .map(Value::Uuid)
                .map_err(|e| field_error(format!("'{}': {}", s, e)))?
        }
        (FieldType::Enum(_), ValueRef::Text(bytes)) => Value::Enum(text(bytes)?),
        (FieldType::String, ValueRef::Text(bytes)) => Value::Text(text(bytes)?),
        (ty, other) => {
            return Err(field_error(format!(
                "列类型 {:?} 与字段类型 {} 不符",
                other.data_type(),
                ty
            )))
        }
    };
    Ok(value)
}

// ==========================================
// SqliteSession
// ==========================================
pub struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
    schema: EntitySchema,
    layout: TableLayout,
    working: Vec<WorkingRecord>,
}

impl SqliteSession {
    fn load_matching(&self, field: &FieldDescriptor, value: &Value) -> StoreResult<Option<StoredRecord>> {
        let column = if field.key {
            &self.layout.id_column
        } else {
            &field.name
        };
        let sql = format!(
            "{} WHERE \"{}\" = ?1 ORDER BY \"{}\"",
            self.layout.select_sql(),
            column,
            self.layout.id_column
        );
        let loaded: Vec<i64> = self.working.iter().filter_map(|r| r.id).collect();

        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([to_sql(value)])?;
        while let Some(row) = rows.next()? {
            let record = self.layout.read_row(row)?;
            if !loaded.contains(&record.id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn write_pending(&self, pending: &[WorkingRecord]) -> StoreResult<usize> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        let insert_sql = self.layout.insert_sql();
        let update_sql = self.layout.update_sql();

        for record in pending {
            let mut values = self.layout.column_values(record);
            match record.id {
                None => {
                    tx.execute(&insert_sql, params_from_iter(values.iter()))?;
                }
                Some(id) => {
                    if let Some(sql) = &update_sql {
                        values.push(SqlValue::Integer(id));
                        tx.execute(sql, params_from_iter(values.iter()))?;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(pending.len())
    }
}

impl RecordSession for SqliteSession {
    fn create(&mut self) -> StoreResult<RecordHandle> {
        self.working.push(WorkingRecord::new_for(&self.schema));
        Ok(RecordHandle(self.working.len() - 1))
    }

    fn find_one(&mut self, field: &str, value: &Value) -> StoreResult<Option<RecordHandle>> {
        let descriptor = lookup_field(&self.schema, field)?.clone();
        if value.is_null() {
            return Ok(None);
        }

        if let Some(idx) = self
            .working
            .iter()
            .position(|r| r.matches(&descriptor, value))
        {
            return Ok(Some(RecordHandle(idx)));
        }

        Ok(self.load_matching(&descriptor, value)?.map(|record| {
            self.working.push(WorkingRecord::loaded(record));
            RecordHandle(self.working.len() - 1)
        }))
    }

    fn set_value(&mut self, record: RecordHandle, field: &str, value: Value) -> StoreResult<()> {
        let name = writable_field(&self.schema, field)?.name.clone();
        let working = self
            .working
            .get_mut(record.0)
            .ok_or(StoreError::InvalidHandle(record.0))?;
        working.values.insert(name, value);
        working.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<usize> {
        let pending: Vec<WorkingRecord> = std::mem::take(&mut self.working)
            .into_iter()
            .filter(|r| r.dirty)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let written = self.write_pending(&pending).map_err(|e| match e {
            StoreError::Unavailable(msg) => StoreError::Unavailable(msg),
            other => StoreError::CommitFailed(other.to_string()),
        })?;
        debug!(entity = %self.schema.name, written, "批次已提交");
        Ok(written)
    }
}
