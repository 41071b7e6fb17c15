// ==========================================
// 表格导入管道 - 目标实体元数据
// ==========================================
// 职责: 描述目标类型的字段（名称/声明类型/可写/主键）
// 用途: 字段映射候选集、类型转换目标、记录仓储建表
// ==========================================

use crate::domain::types::Value;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==========================================
// FieldType - 字段声明类型
// ==========================================
// Nullable 为可空包装; 类型转换时先解包
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float64,
    Bool,
    DateTime,
    Uuid,
    Enum(EnumType),
    Nullable(Box<FieldType>),
}

/// 枚举类型: 名称 + 有序成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, members: &[&str]) -> Self {
        Self {
            name: name.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl FieldType {
    pub fn nullable(inner: FieldType) -> Self {
        FieldType::Nullable(Box::new(inner))
    }

    /// 解开可空包装
    ///
    /// # 返回
    /// - (底层类型, 是否可空)
    pub fn underlying(&self) -> (&FieldType, bool) {
        match self {
            FieldType::Nullable(inner) => (inner.underlying().0, true),
            other => (other, false),
        }
    }

    /// 引用类型: 缺失时结果为 Null 而非零值
    pub fn is_reference_type(&self) -> bool {
        matches!(self.underlying().0, FieldType::String)
    }

    /// 类型零值（新建记录的初始值）
    ///
    /// - 可空/引用类型 → Null
    /// - 数值 → 0, 布尔 → false, 日期 → 0001-01-01, UUID → nil
    /// - 枚举 → 第一个成员
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Nullable(_) | FieldType::String => Value::Null,
            FieldType::Int32 | FieldType::Int64 => Value::Int(0),
            FieldType::Float64 => Value::Float(0.0),
            FieldType::Bool => Value::Bool(false),
            FieldType::DateTime => Value::DateTime(min_datetime()),
            FieldType::Uuid => Value::Uuid(Uuid::nil()),
            FieldType::Enum(e) => e
                .members
                .first()
                .map(|m| Value::Enum(m.clone()))
                .unwrap_or(Value::Null),
        }
    }
}

fn min_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int32 => write!(f, "Int32"),
            FieldType::Int64 => write!(f, "Int64"),
            FieldType::Float64 => write!(f, "Double"),
            FieldType::Bool => write!(f, "Boolean"),
            FieldType::DateTime => write!(f, "DateTime"),
            FieldType::Uuid => write!(f, "Uuid"),
            FieldType::Enum(e) => write!(f, "{}", e.name),
            FieldType::Nullable(inner) => write!(f, "Nullable<{}>", inner),
        }
    }
}

// ==========================================
// FieldDescriptor - 字段描述
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default)]
    pub key: bool, // 标识/主键字段（不参与自动映射）
}

fn default_true() -> bool {
    true
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            public: true,
            writable: true,
            key: false,
        }
    }

    /// 标记为标识字段
    pub fn as_key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn is_public_writable(&self) -> bool {
        self.public && self.writable
    }
}

// ==========================================
// EntityMetadata - 元数据读取接口
// ==========================================
// 实现者: EntitySchema
pub trait EntityMetadata {
    fn entity_name(&self) -> &str;

    fn fields(&self) -> &[FieldDescriptor];

    /// 按名称精确查找字段
    fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// 自动映射候选: 公开可写且非标识字段（保持声明顺序）
    fn auto_map_candidates(&self) -> Vec<&FieldDescriptor> {
        self.fields()
            .iter()
            .filter(|f| f.is_public_writable() && !f.key)
            .collect()
    }

    /// 可手工映射的字段名: 公开可写（包含标识字段）
    fn mappable_properties(&self) -> Vec<&str> {
        self.fields()
            .iter()
            .filter(|f| f.is_public_writable())
            .map(|f| f.name.as_str())
            .collect()
    }
}

// ==========================================
// EntitySchema - 目标实体结构
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// 从 JSON 描述加载
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl EntityMetadata for EntitySchema {
    fn entity_name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_schema() -> EntitySchema {
        EntitySchema::new(
            "Product",
            vec![
                FieldDescriptor::new("Oid", FieldType::Int64).as_key(),
                FieldDescriptor::new("Code", FieldType::String),
                FieldDescriptor::new("Quantity", FieldType::Int32),
                FieldDescriptor::new("Computed", FieldType::String).read_only(),
                FieldDescriptor::new("Internal", FieldType::String).private(),
            ],
        )
    }

    #[test]
    fn test_underlying_unwraps_nullable() {
        let ty = FieldType::nullable(FieldType::Int32);
        assert_eq!(ty.underlying(), (&FieldType::Int32, true));
        assert_eq!(FieldType::Bool.underlying(), (&FieldType::Bool, false));
        assert!(FieldType::nullable(FieldType::String).is_reference_type());
        assert!(!FieldType::Int64.is_reference_type());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(FieldType::Int32.default_value(), Value::Int(0));
        assert_eq!(FieldType::nullable(FieldType::Int32).default_value(), Value::Null);
        assert_eq!(FieldType::String.default_value(), Value::Null);
        assert_eq!(FieldType::Bool.default_value(), Value::Bool(false));
        let kind = FieldType::Enum(EnumType::new("Kind", &["Person", "Company"]));
        assert_eq!(kind.default_value(), Value::Enum("Person".to_string()));
    }

    #[test]
    fn test_auto_map_candidates_exclude_key_and_read_only() {
        let schema = product_schema();
        let names: Vec<&str> = schema
            .auto_map_candidates()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["Code", "Quantity"]);
    }

    #[test]
    fn test_mappable_properties_include_key() {
        let schema = product_schema();
        assert_eq!(schema.mappable_properties(), vec!["Oid", "Code", "Quantity"]);
    }

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "name": "Contact",
            "fields": [
                {"name": "Email", "type": "string"},
                {"name": "Age", "type": {"nullable": "int32"}},
                {"name": "Kind", "type": {"enum": {"name": "ContactKind", "members": ["Person", "Company"]}}},
                {"name": "Id", "type": "int64", "key": true, "writable": false}
            ]
        }"#;

        let schema = EntitySchema::from_json(json).unwrap();
        assert_eq!(schema.fields.len(), 4);
        assert_eq!(schema.fields[1].field_type, FieldType::nullable(FieldType::Int32));
        assert_eq!(schema.fields[2].field_type.to_string(), "ContactKind");
        assert!(schema.fields[3].key);
        assert!(!schema.fields[3].writable);
        assert!(schema.fields[0].public);
    }
}
