// ==========================================
// 表格导入管道 - 导入领域模型
// ==========================================
// 职责: 导入参数、字段映射、导入规则、导入报告
// 生命周期:
// - ImportParameter: 每次导入创建一次; 执行前由解析/映射/调用方填充
// - ImportReport: 执行开始时创建, 仅执行引擎写入, 返回后只读
// ==========================================

use crate::domain::types::ImportMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认提交批大小
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ==========================================
// FieldMap - 源列 → 目标字段映射
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    pub source_column: String,
    pub target_property: Option<String>, // None/空 → 不导入
    pub target_property_type: Option<String>,
    pub default_value: Option<String>, // 原值缺失/空白时使用
    pub sample_value: Option<String>,  // 仅用于预览
    pub skip: bool,
    pub auto_mapped: bool, // 来源标记: 由自动映射产生
}

impl FieldMap {
    pub fn new(source_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            ..Default::default()
        }
    }

    /// 手工指定目标字段
    pub fn mapped_to(mut self, target_property: impl Into<String>) -> Self {
        self.target_property = Some(target_property.into());
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// 参与执行: 未跳过且目标字段非空
    pub fn is_active(&self) -> bool {
        !self.skip
            && self
                .target_property
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }

    pub fn targets(&self, property: &str) -> bool {
        self.target_property
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(property))
            .unwrap_or(false)
    }
}

// ==========================================
// ImportRule - 按实体配置的导入规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRule {
    pub entity: String,
    pub caption: String,
    pub default_import_mode: ImportMode,
    pub batch_size: usize,
}

impl ImportRule {
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            caption: format!("Import {}", entity),
            entity,
            default_import_mode: ImportMode::Insert,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// ==========================================
// ImportParameter - 单次导入配置
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportParameter {
    pub file_name: Option<String>,
    pub file_content: Option<Vec<u8>>,
    pub sheet_name: Option<String>,
    pub has_headers: bool,
    pub header_row_index: usize,
    pub data_start_row_index: usize,
    pub import_mode: ImportMode,
    pub key_property: Option<String>,
    pub batch_size: usize,
    pub max_records_to_import: usize, // 0 = 不限
    pub field_maps: Vec<FieldMap>,
    pub available_sheets: Vec<String>,
}

impl Default for ImportParameter {
    fn default() -> Self {
        Self {
            file_name: None,
            file_content: None,
            sheet_name: None,
            has_headers: true,
            header_row_index: 0,
            data_start_row_index: 1,
            import_mode: ImportMode::Insert,
            key_property: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_records_to_import: 0,
            field_maps: Vec::new(),
            available_sheets: Vec::new(),
        }
    }
}

impl ImportParameter {
    /// # 参数
    /// - file_name: 文件名（用于按扩展名识别格式）
    /// - content: 文件字节
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            file_content: Some(content),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ImportMode, key_property: Option<&str>) -> Self {
        self.import_mode = mode;
        self.key_property = key_property.map(|k| k.to_string());
        self
    }

    /// 应用实体导入规则（默认模式与批大小）
    pub fn apply_rule(&mut self, rule: &ImportRule) {
        self.import_mode = rule.default_import_mode;
        self.batch_size = if rule.batch_size > 0 {
            rule.batch_size
        } else {
            DEFAULT_BATCH_SIZE
        };
    }

    pub fn has_content(&self) -> bool {
        self.file_content
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// 有效批大小: 配置值 > 0 时使用, 否则 100
    pub fn resolved_batch_size(&self) -> usize {
        if self.batch_size > 0 {
            self.batch_size
        } else {
            DEFAULT_BATCH_SIZE
        }
    }

    pub fn active_maps(&self) -> Vec<&FieldMap> {
        self.field_maps.iter().filter(|m| m.is_active()).collect()
    }

    pub fn key_property(&self) -> Option<&str> {
        self.key_property.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn field_map_mut(&mut self, source_column: &str) -> Option<&mut FieldMap> {
        self.field_maps
            .iter_mut()
            .find(|m| m.source_column.eq_ignore_ascii_case(source_column))
    }

    pub fn field_map_for_target(&self, property: &str) -> Option<&FieldMap> {
        self.field_maps.iter().find(|m| m.targets(property))
    }
}

// ==========================================
// RowError - 行/列级错误
// ==========================================
// 追加写入; 顺序与遇到顺序一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize, // 源文件中的行号（0 起）
    pub column_name: Option<String>,
    pub raw_value: Option<String>,
    pub target_property: Option<String>,
    pub message: String,
}

impl RowError {
    /// 行级错误（无列信息）
    pub fn row(row_index: usize, message: impl Into<String>) -> Self {
        Self {
            row_index,
            column_name: None,
            raw_value: None,
            target_property: None,
            message: message.into(),
        }
    }

    /// 字段级错误
    pub fn field(
        row_index: usize,
        column_name: &str,
        raw_value: Option<String>,
        target_property: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            column_name: Some(column_name.to_string()),
            raw_value,
            target_property: Some(target_property.to_string()),
            message: message.into(),
        }
    }
}

// ==========================================
// ImportReport - 导入结果汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub inserted_count: usize,
    pub updated_count: usize,
    pub elapsed_seconds: f64,
    pub summary: String,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn push_error(&mut self, error: RowError) {
        self.errors.push(error);
    }

    /// 计算派生统计并生成摘要
    pub fn finalize(&mut self, elapsed: Duration) {
        self.elapsed_seconds = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
        self.success_count = self.inserted_count + self.updated_count;
        self.error_count = self.errors.len();
        self.summary = format!(
            "Imported {} of {} rows ({} inserted, {} updated, {} errors) in {}s",
            self.success_count,
            self.total_rows,
            self.inserted_count,
            self.updated_count,
            self.error_count,
            self.elapsed_seconds
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_map_is_active() {
        assert!(!FieldMap::new("Code").is_active());
        assert!(FieldMap::new("Code").mapped_to("Code").is_active());

        let mut skipped = FieldMap::new("Code").mapped_to("Code");
        skipped.skip = true;
        assert!(!skipped.is_active());

        let mut empty = FieldMap::new("Code");
        empty.target_property = Some(String::new());
        assert!(!empty.is_active());
    }

    #[test]
    fn test_resolved_batch_size() {
        let mut param = ImportParameter::default();
        assert_eq!(param.resolved_batch_size(), 100);
        param.batch_size = 0;
        assert_eq!(param.resolved_batch_size(), 100);
        param.batch_size = 7;
        assert_eq!(param.resolved_batch_size(), 7);
    }

    #[test]
    fn test_apply_rule() {
        let mut param = ImportParameter::default();
        let rule = ImportRule {
            entity: "Product".to_string(),
            caption: "Products".to_string(),
            default_import_mode: ImportMode::Upsert,
            batch_size: 0,
        };
        param.apply_rule(&rule);
        assert_eq!(param.import_mode, ImportMode::Upsert);
        assert_eq!(param.batch_size, 100);
    }

    #[test]
    fn test_blank_key_property_is_none() {
        let param = ImportParameter::default().with_mode(ImportMode::Update, Some("  "));
        assert_eq!(param.key_property(), None);
    }

    #[test]
    fn test_report_finalize_summary() {
        let mut report = ImportReport {
            total_rows: 3,
            inserted_count: 1,
            updated_count: 1,
            ..Default::default()
        };
        report.push_error(RowError::row(2, "boom"));
        report.finalize(Duration::from_millis(1234));

        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.elapsed_seconds, 1.23);
        assert_eq!(
            report.summary,
            "Imported 2 of 3 rows (1 inserted, 1 updated, 1 errors) in 1.23s"
        );
    }
}
