// ==========================================
// 表格导入管道 - 领域类型定义
// ==========================================
// 职责: 导入模式、标量值、解析行
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ==========================================
// 导入模式 (Import Mode)
// ==========================================
// 决定每一行如何解析为目标记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    #[default]
    Insert, // 总是新建
    Update, // 仅按主键更新已有记录
    Upsert, // 命中则更新,否则新建
}

impl ImportMode {
    /// 该模式是否需要 KeyProperty
    pub fn requires_key(&self) -> bool {
        matches!(self, ImportMode::Update | ImportMode::Upsert)
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Insert => write!(f, "INSERT"),
            ImportMode::Update => write!(f, "UPDATE"),
            ImportMode::Upsert => write!(f, "UPSERT"),
        }
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INSERT" => Ok(ImportMode::Insert),
            "UPDATE" => Ok(ImportMode::Update),
            "UPSERT" => Ok(ImportMode::Upsert),
            other => Err(format!("未知导入模式: {}", other)),
        }
    }
}

// ==========================================
// Value - 标量值
// ==========================================
// 解析器只产出 Null/Bool/Float/Text/DateTime;
// 其余变体由类型转换产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
    Enum(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 缺失值判定: Null 或仅含空白的字符串
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 用于错误报告的文本形式 (Null → None)
    pub fn to_raw_text(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Uuid(id) => write!(f, "{}", id.hyphenated()),
            Value::Enum(member) => write!(f, "{}", member),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ==========================================
// ParsedRow - 解析后的数据行
// ==========================================
// 列名 → 值 的有序映射; 列名查找大小写不敏感
// (lookup 中保存小写化的列名)
#[derive(Debug, Clone, Default)]
pub struct ParsedRow {
    row_index: usize,
    columns: Vec<(String, Value)>,
    lookup: HashMap<String, usize>,
}

impl ParsedRow {
    /// # 参数
    /// - row_index: 该行在源工作表中的行号（0 起）
    pub fn new(row_index: usize) -> Self {
        Self {
            row_index,
            columns: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }

    /// 写入列值; 同名列（忽略大小写）后写覆盖先写
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        let key = normalize_column_key(&column);
        match self.lookup.get(&key) {
            Some(&idx) => self.columns[idx].1 = value,
            None => {
                self.lookup.insert(key, self.columns.len());
                self.columns.push((column, value));
            }
        }
    }

    /// 按列名取值（忽略大小写）
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.lookup
            .get(&normalize_column_key(column))
            .map(|&idx| &self.columns[idx].1)
    }

    /// 至少有一个非空单元格
    pub fn has_data(&self) -> bool {
        self.columns.iter().any(|(_, v)| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn normalize_column_key(column: &str) -> String {
    column.to_lowercase()
}
