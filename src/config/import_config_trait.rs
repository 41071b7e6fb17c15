// ==========================================
// 表格导入管道 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含导入逻辑
// ==========================================

use crate::domain::import::{ImportParameter, ImportRule};
use crate::domain::types::ImportMode;
use crate::importer::error::ImportResult;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入参数的默认值来源
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 全局默认值 =====

    /// 获取默认提交批大小
    ///
    /// # 默认值
    /// - 100
    async fn get_default_batch_size(&self) -> ImportResult<usize>;

    /// 获取默认导入模式
    ///
    /// # 默认值
    /// - INSERT
    async fn get_default_import_mode(&self) -> ImportResult<ImportMode>;

    /// 获取单次导入行数上限
    ///
    /// # 默认值
    /// - 0（不限）
    async fn get_max_records_to_import(&self) -> ImportResult<usize>;

    /// 首行是否为表头
    ///
    /// # 默认值
    /// - true
    async fn get_has_headers(&self) -> ImportResult<bool>;

    /// # 默认值
    /// - 0
    async fn get_header_row_index(&self) -> ImportResult<usize>;

    /// # 默认值
    /// - 1
    async fn get_data_start_row_index(&self) -> ImportResult<usize>;

    // ===== 实体级规则 =====

    /// 获取实体导入规则
    ///
    /// # 逻辑
    /// 1. 读取 import/<entity>/* 键
    /// 2. 缺失时回退到全局默认值
    async fn get_import_rule(&self, entity: &str) -> ImportResult<ImportRule>;

    /// 按配置构建导入参数
    ///
    /// # 参数
    /// - entity: 目标实体名
    /// - file_name: 文件名
    /// - content: 文件字节
    async fn build_parameter(
        &self,
        entity: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> ImportResult<ImportParameter> {
        let mut parameter = ImportParameter::new(file_name, content);
        parameter.has_headers = self.get_has_headers().await?;
        parameter.header_row_index = self.get_header_row_index().await?;
        parameter.data_start_row_index = self.get_data_start_row_index().await?;
        parameter.max_records_to_import = self.get_max_records_to_import().await?;
        parameter.apply_rule(&self.get_import_rule(entity).await?);
        Ok(parameter)
    }
}
