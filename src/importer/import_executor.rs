// ==========================================
// 表格导入管道 - 导入执行引擎
// ==========================================
// 流程:
// 0. 校验导入配置（Update/Upsert 的 KeyProperty 及其映射）
// 1. 解析数据行
// 2. 逐行: 解析目标记录 → 逐字段转换并赋值
// 3. 每 BatchSize 行（按位置）提交一次; 循环结束后最终提交
// 4. 汇总统计, 生成摘要
// 错误分级:
// - 行级（类型转换/主键未命中/非致命仓储错误）→ RowError, 继续下一行
// - 循环外（文档解析/会话打开/批次提交/仓储不可用）→ Err 返回
// ==========================================

use crate::domain::import::{FieldMap, ImportParameter, ImportReport, RowError};
use crate::domain::schema::{EntityMetadata, EntitySchema, FieldDescriptor};
use crate::domain::types::{ImportMode, ParsedRow, Value};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::TabularParser;
use crate::importer::value_coercion::coerce;
use crate::repository::error::StoreError;
use crate::repository::record_store::{RecordHandle, RecordSession, RecordStore};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

// ==========================================
// RowOutcome - 单行处理结果
// ==========================================
#[derive(Debug)]
pub enum RowOutcome {
    /// 已解析目标记录并完成赋值（字段级错误已写入报告）
    Resolved,
    /// 整行跳过, 附带一条行级错误
    Skipped(RowError),
    /// 致命错误, 终止整次导入
    Fatal(ImportError),
}

/// 目标记录来源
enum Resolution {
    Created(RecordHandle),
    Found(RecordHandle),
}

// ==========================================
// ImportPlan - 校验后的执行计划
// ==========================================
struct ImportPlan<'a> {
    mode: ImportMode,
    assignments: Vec<(&'a FieldMap, &'a FieldDescriptor)>,
    key: Option<KeyLookup<'a>>,
}

struct KeyLookup<'a> {
    field: &'a FieldDescriptor,
    source_column: &'a str,
}

impl<'a> ImportPlan<'a> {
    /// 构建执行计划
    ///
    /// # 返回
    /// - Err(ConfigurationError): Update/Upsert 缺少 KeyProperty,
    ///   KeyProperty 不在实体中, 或没有（或有多个）有效映射指向 KeyProperty
    fn build(parameter: &'a ImportParameter, schema: &'a EntitySchema) -> ImportResult<Self> {
        let active = parameter.active_maps();

        let mut assignments = Vec::with_capacity(active.len());
        for map in &active {
            let target = map.target_property.as_deref().unwrap_or_default();
            match resolve_field(schema, target) {
                Some(field) if field.writable && !field.key => assignments.push((*map, field)),
                Some(field) => {
                    debug!(field = %field.name, "目标字段不可写, 仅用于查找")
                }
                None => warn!(property = target, "目标字段不存在, 忽略该映射"),
            }
        }

        let key = if parameter.import_mode.requires_key() {
            Some(Self::key_lookup(parameter, schema, &active)?)
        } else {
            None
        };

        Ok(Self {
            mode: parameter.import_mode,
            assignments,
            key,
        })
    }

    fn key_lookup(
        parameter: &'a ImportParameter,
        schema: &'a EntitySchema,
        active: &[&'a FieldMap],
    ) -> ImportResult<KeyLookup<'a>> {
        let mode = parameter.import_mode;
        let key = parameter.key_property().ok_or_else(|| {
            ImportError::ConfigurationError(format!("导入模式 {} 需要 KeyProperty", mode))
        })?;

        let field = resolve_field(schema, key).ok_or_else(|| {
            ImportError::ConfigurationError(format!(
                "KeyProperty '{}' 不是实体 {} 的字段",
                key, schema.name
            ))
        })?;

        let key_maps: Vec<&'a FieldMap> = active
            .iter()
            .copied()
            .filter(|m| m.targets(key))
            .collect();
        match key_maps.as_slice() {
            [map] => {
                let map: &'a FieldMap = *map;
                Ok(KeyLookup {
                    field,
                    source_column: map.source_column.as_str(),
                })
            }
            [] => Err(ImportError::ConfigurationError(format!(
                "没有列映射到 KeyProperty '{}'",
                key
            ))),
            _ => Err(ImportError::ConfigurationError(format!(
                "多个列映射到 KeyProperty '{}'",
                key
            ))),
        }
    }
}

/// 字段查找: 先精确, 再忽略大小写
fn resolve_field<'a>(schema: &'a EntitySchema, name: &str) -> Option<&'a FieldDescriptor> {
    schema.find_field(name).or_else(|| {
        schema
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    })
}

// ==========================================
// ImportExecutor
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportExecutor {
    parser: TabularParser,
}

impl ImportExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行导入
    ///
    /// # 参数
    /// - store: 记录仓储（本次导入独占一个会话）
    /// - parameter: 导入参数（文件内容/映射/模式）
    /// - schema: 目标实体结构
    ///
    /// # 返回
    /// - Ok(ImportReport): 导入结果（含行级错误）
    /// - Err: 配置错误 / 文档解析失败 / 会话打开失败 / 提交失败 / 仓储不可用
    #[instrument(skip_all, fields(entity = %schema.name, mode = %parameter.import_mode))]
    pub fn execute<S: RecordStore>(
        &self,
        store: &S,
        parameter: &ImportParameter,
        schema: &EntitySchema,
    ) -> ImportResult<ImportReport> {
        let started = Instant::now();
        let plan = ImportPlan::build(parameter, schema)?;

        let rows = self.parser.parse_rows(parameter)?;
        let batch_size = parameter.resolved_batch_size();
        let max_records = parameter.max_records_to_import;
        info!(
            total_rows = rows.len(),
            batch_size,
            max_records,
            mapped_fields = plan.assignments.len(),
            "开始执行导入"
        );

        let mut report = ImportReport {
            total_rows: rows.len(),
            ..Default::default()
        };
        let mut session = store.open_session(schema)?;
        let mut last_row = 0;

        for (position, row) in rows.iter().enumerate() {
            if max_records > 0 && position >= max_records {
                debug!(max_records, "已达到导入上限, 停止处理");
                break;
            }
            last_row = row.row_index();

            match self.process_row(&mut session, &plan, row, &mut report) {
                RowOutcome::Resolved => {}
                RowOutcome::Skipped(error) => {
                    debug!(row_index = error.row_index, message = %error.message, "行已跳过");
                    report.push_error(error);
                }
                RowOutcome::Fatal(error) => {
                    warn!(row_index = last_row, error = %error, "导入终止");
                    return Err(error);
                }
            }

            if (position + 1) % batch_size == 0 {
                commit_batch(&mut session, last_row)?;
            }
        }

        commit_batch(&mut session, last_row)?;

        report.finalize(started.elapsed());
        info!(
            inserted = report.inserted_count,
            updated = report.updated_count,
            errors = report.error_count,
            elapsed_seconds = report.elapsed_seconds,
            "导入完成"
        );
        Ok(report)
    }

    /// 处理单行
    fn process_row<T: RecordSession>(
        &self,
        session: &mut T,
        plan: &ImportPlan<'_>,
        row: &ParsedRow,
        report: &mut ImportReport,
    ) -> RowOutcome {
        let handle = match self.resolve_record(session, plan, row) {
            Ok(Resolution::Created(handle)) => {
                report.inserted_count += 1;
                handle
            }
            Ok(Resolution::Found(handle)) => {
                report.updated_count += 1;
                handle
            }
            Err(error) => return row_failure(row, error),
        };

        for (map, field) in &plan.assignments {
            let raw = row.get(&map.source_column).cloned().unwrap_or(Value::Null);
            let field_error = |message: String| {
                RowError::field(
                    row.row_index(),
                    &map.source_column,
                    raw.to_raw_text(),
                    &field.name,
                    message,
                )
            };

            let value = match coerce(&raw, &field.field_type, map.default_value.as_deref()) {
                Ok(value) => value,
                Err(e) => {
                    report.push_error(field_error(e.message));
                    continue;
                }
            };

            if let Err(e) = session.set_value(handle, &field.name, value) {
                if e.is_fatal() {
                    return RowOutcome::Fatal(e.into());
                }
                report.push_error(field_error(e.to_string()));
            }
        }

        RowOutcome::Resolved
    }

    /// 按导入模式解析目标记录
    fn resolve_record<T: RecordSession>(
        &self,
        session: &mut T,
        plan: &ImportPlan<'_>,
        row: &ParsedRow,
    ) -> ImportResult<Resolution> {
        let Some(key) = plan.key.as_ref().filter(|_| plan.mode.requires_key()) else {
            return Ok(Resolution::Created(session.create()?));
        };

        if let Some(existing) = self.find_existing(session, key, row)? {
            return Ok(Resolution::Found(existing));
        }

        match plan.mode {
            ImportMode::Upsert => Ok(Resolution::Created(session.create()?)),
            _ => Err(ImportError::KeyResolutionError {
                key: key.field.name.clone(),
            }),
        }
    }

    /// 按主键查找已有记录（主键单元格为空视为未命中）
    fn find_existing<T: RecordSession>(
        &self,
        session: &mut T,
        key: &KeyLookup<'_>,
        row: &ParsedRow,
    ) -> ImportResult<Option<RecordHandle>> {
        let raw = row.get(key.source_column).cloned().unwrap_or(Value::Null);
        if raw.is_blank() {
            return Ok(None);
        }

        let key_value = coerce(&raw, &key.field.field_type, None)?;
        Ok(session.find_one(&key.field.name, &key_value)?)
    }
}

/// 行内错误 → 行结果
fn row_failure(row: &ParsedRow, error: ImportError) -> RowOutcome {
    match error {
        ImportError::StoreError(e) if e.is_fatal() => RowOutcome::Fatal(ImportError::StoreError(e)),
        e if e.is_row_scoped() => RowOutcome::Skipped(RowError::row(row.row_index(), e.to_string())),
        e => RowOutcome::Fatal(e),
    }
}

fn commit_batch<T: RecordSession>(session: &mut T, row: usize) -> ImportResult<()> {
    match session.commit() {
        Ok(written) => {
            debug!(row_index = row, written, "批次提交完成");
            Ok(())
        }
        Err(StoreError::Unavailable(message)) | Err(StoreError::CommitFailed(message)) => {
            Err(ImportError::CommitError { row, message })
        }
        Err(e) => Err(ImportError::CommitError {
            row,
            message: e.to_string(),
        }),
    }
}
