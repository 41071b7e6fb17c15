// ==========================================
// 表格导入管道 - 字段自动映射
// ==========================================
// 职责: 按名称把源列匹配到目标实体字段
// 规则:
// - 候选字段: 公开可写且非标识字段（按声明顺序, 首个命中生效）
// - 名称归一化: 去掉 '_' / ' ' / '-' 后转小写, 精确比较
// - Skip 的映射不处理; 未命中的映射保持原样
// - 幂等: 重复执行结果一致
// ==========================================

use crate::domain::import::FieldMap;
use crate::domain::schema::EntityMetadata;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct FieldMapper;

impl FieldMapper {
    pub fn new() -> Self {
        Self
    }

    /// 自动映射
    ///
    /// # 参数
    /// - metadata: 目标实体元数据
    /// - field_maps: 当前映射（原地修改）
    ///
    /// # 返回
    /// - 本次命中的映射数量
    pub fn auto_map(&self, metadata: &dyn EntityMetadata, field_maps: &mut [FieldMap]) -> usize {
        let candidates: Vec<(String, &str, String)> = metadata
            .auto_map_candidates()
            .into_iter()
            .map(|f| (normalize(&f.name), f.name.as_str(), f.field_type.to_string()))
            .collect();

        let mut matched = 0;
        for field_map in field_maps.iter_mut().filter(|m| !m.skip) {
            let source = normalize(&field_map.source_column);
            if let Some((_, name, type_name)) = candidates.iter().find(|(n, _, _)| *n == source) {
                field_map.target_property = Some(name.to_string());
                field_map.target_property_type = Some(type_name.clone());
                field_map.auto_mapped = true;
                matched += 1;
            }
        }

        debug!(
            entity = metadata.entity_name(),
            matched,
            total = field_maps.len(),
            "自动映射完成"
        );
        matched
    }
}

/// 列名/字段名归一化
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | ' ' | '-'))
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{EntitySchema, FieldDescriptor, FieldType};

    fn schema() -> EntitySchema {
        EntitySchema::new(
            "Product",
            vec![
                FieldDescriptor::new("Oid", FieldType::Int64).as_key(),
                FieldDescriptor::new("Code", FieldType::String),
                FieldDescriptor::new("UnitPrice", FieldType::Float64),
                FieldDescriptor::new("IsActive", FieldType::Bool),
                FieldDescriptor::new("Computed", FieldType::String).read_only(),
            ],
        )
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Unit_Price"), "unitprice");
        assert_eq!(normalize(" is-active "), "isactive");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_auto_map_matches_normalized_names() {
        let mut maps = vec![
            FieldMap::new("code"),
            FieldMap::new("Unit Price"),
            FieldMap::new("is_active"),
            FieldMap::new("Unknown"),
        ];

        let matched = FieldMapper::new().auto_map(&schema(), &mut maps);

        assert_eq!(matched, 3);
        assert_eq!(maps[0].target_property.as_deref(), Some("Code"));
        assert_eq!(maps[1].target_property.as_deref(), Some("UnitPrice"));
        assert_eq!(maps[1].target_property_type.as_deref(), Some("Double"));
        assert!(maps[2].auto_mapped);
        assert_eq!(maps[3].target_property, None);
        assert!(!maps[3].auto_mapped);
    }

    #[test]
    fn test_key_read_only_and_skipped_are_untouched() {
        let mut skipped = FieldMap::new("Code");
        skipped.skip = true;
        let mut maps = vec![FieldMap::new("Oid"), FieldMap::new("Computed"), skipped];

        let matched = FieldMapper::new().auto_map(&schema(), &mut maps);

        assert_eq!(matched, 0);
        assert!(maps.iter().all(|m| m.target_property.is_none()));
    }

    #[test]
    fn test_auto_map_is_idempotent() {
        let mut maps = vec![
            FieldMap::new("CODE"),
            FieldMap::new("unit-price"),
            FieldMap::new("Other").mapped_to("IsActive"),
        ];
        let mapper = FieldMapper::new();

        mapper.auto_map(&schema(), &mut maps);
        let first = maps.clone();
        mapper.auto_map(&schema(), &mut maps);

        assert_eq!(maps, first);
        // 未命中的手工映射保持原样
        assert_eq!(maps[2].target_property.as_deref(), Some("IsActive"));
        assert!(!maps[2].auto_mapped);
    }
}
