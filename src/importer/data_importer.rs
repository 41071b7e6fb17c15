// ==========================================
// 表格导入管道 - 文件导入门面
// ==========================================
// 职责: 读取文件 → 载入结构 → 自动映射 → 执行导入
// 组合: ImportConfigReader（默认值） + RecordStore（落库）
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::domain::import::{ImportParameter, ImportReport};
use crate::domain::schema::EntitySchema;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::import_executor::ImportExecutor;
use crate::repository::record_store::RecordStore;
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, info_span, instrument};
use uuid::Uuid;

// ==========================================
// DataImporter Trait
// ==========================================
#[async_trait]
pub trait DataImporter: Send + Sync {
    /// 准备导入参数（读取文件、载入结构、自动映射）
    ///
    /// # 参数
    /// - file_path: 表格文件路径（.xlsx/.xls/.csv）
    /// - schema: 目标实体结构
    ///
    /// # 返回
    /// - Ok(ImportParameter): 可供调用方调整后执行
    async fn prepare<P: AsRef<Path> + Send>(
        &self,
        file_path: P,
        schema: &EntitySchema,
    ) -> ImportResult<ImportParameter>;

    /// 执行已准备好的导入
    async fn run(
        &self,
        parameter: &ImportParameter,
        schema: &EntitySchema,
    ) -> ImportResult<ImportReport>;

    /// 一步完成: prepare + run
    async fn import_file<P: AsRef<Path> + Send>(
        &self,
        file_path: P,
        schema: &EntitySchema,
    ) -> ImportResult<ImportReport> {
        let parameter = self.prepare(file_path, schema).await?;
        self.run(&parameter, schema).await
    }
}

// ==========================================
// DataImporterImpl
// ==========================================
pub struct DataImporterImpl<S, C>
where
    S: RecordStore,
    C: ImportConfigReader,
{
    store: S,
    config: C,
    mapper: FieldMapper,
    executor: ImportExecutor,
}

impl<S, C> DataImporterImpl<S, C>
where
    S: RecordStore,
    C: ImportConfigReader,
{
    /// # 参数
    /// - store: 记录仓储
    /// - config: 配置读取器
    pub fn new(store: S, config: C) -> Self {
        Self {
            store,
            config,
            mapper: FieldMapper::new(),
            executor: ImportExecutor::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S, C> DataImporter for DataImporterImpl<S, C>
where
    S: RecordStore + Send + Sync,
    C: ImportConfigReader + Send + Sync,
{
    #[instrument(skip(self, file_path, schema), fields(entity = %schema.name))]
    async fn prepare<P: AsRef<Path> + Send>(
        &self,
        file_path: P,
        schema: &EntitySchema,
    ) -> ImportResult<ImportParameter> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImportError::FileReadError(format!("无效文件名: {}", path.display())))?
            .to_string();

        let content = tokio::fs::read(path).await?;
        info!(file = %path.display(), size = content.len(), "文件读取完成");

        let mut parameter = self
            .config
            .build_parameter(&schema.name, &file_name, content)
            .await?;
        parameter.load_file()?;
        let matched = self.mapper.auto_map(schema, &mut parameter.field_maps);
        info!(
            sheets = parameter.available_sheets.len(),
            columns = parameter.field_maps.len(),
            matched,
            "导入参数已准备"
        );
        Ok(parameter)
    }

    async fn run(
        &self,
        parameter: &ImportParameter,
        schema: &EntitySchema,
    ) -> ImportResult<ImportReport> {
        let run_id = Uuid::new_v4();
        info_span!("import_run", run_id = %run_id, entity = %schema.name)
            .in_scope(|| self.executor.execute(&self.store, parameter, schema))
    }
}
