// ==========================================
// 表格导入管道 - 命令行入口
// ==========================================
// 用法:
//   tabular-import products.xlsx --schema product.json
//   tabular-import products.csv --schema product.json --mode upsert --key Code
//   tabular-import products.xlsx --schema product.json --map "Item No=Code" --preview
// 输出: stdout 为 JSON（导入报告或映射预览）; 日志写 stderr
// ==========================================

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tabular_import::config::ConfigManager;
use tabular_import::db::default_db_path;
use tabular_import::importer::{DataImporter, DataImporterImpl, FieldMapper};
use tabular_import::repository::SqliteRecordStore;
use tabular_import::{logging, EntitySchema, ImportMode};
use tracing::info;

/// Import a spreadsheet or CSV file into a SQLite table
#[derive(Parser, Debug)]
#[command(name = "tabular-import")]
#[command(version, about, long_about = None)]
struct Args {
    /// Source document (.xlsx, .xls or .csv)
    file: PathBuf,

    /// Target entity schema (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    /// SQLite database path (defaults to the user data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Import mode: insert, update or upsert (defaults to the configured rule)
    #[arg(short, long)]
    mode: Option<ImportMode>,

    /// Key property used by update/upsert
    #[arg(short, long)]
    key: Option<String>,

    /// Worksheet name (defaults to the first sheet)
    #[arg(long)]
    sheet: Option<String>,

    /// Rows per commit
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after this many data rows (0 = unlimited)
    #[arg(long)]
    max_records: Option<usize>,

    /// Treat the first row as data
    #[arg(long)]
    no_headers: bool,

    /// Manual mapping COLUMN=PROPERTY (repeatable)
    #[arg(long = "map", value_parser = parse_mapping)]
    mappings: Vec<(String, String)>,

    /// Print the field mappings without importing
    #[arg(long)]
    preview: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn parse_mapping(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((column, property)) if !column.trim().is_empty() && !property.trim().is_empty() => {
            Ok((column.trim().to_string(), property.trim().to_string()))
        }
        _ => Err(format!("expected COLUMN=PROPERTY, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_json);

    let schema_json = tokio::fs::read_to_string(&args.schema)
        .await
        .with_context(|| format!("无法读取实体结构: {}", args.schema.display()))?;
    let schema = EntitySchema::from_json(&schema_json).context("实体结构 JSON 格式错误")?;

    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("无法创建数据目录: {}", parent.display()))?;
    }
    let db_path = db_path.to_string_lossy().to_string();
    info!(db_path = %db_path, entity = %schema.name, "tabular-import {}", tabular_import::VERSION);

    let store = SqliteRecordStore::new(&db_path)?;
    let config = ConfigManager::new(&db_path)?;
    let importer = DataImporterImpl::new(store, config);

    let mut parameter = importer.prepare(&args.file, &schema).await?;

    // 结构相关参数变化时重新载入表头
    if args.sheet.is_some() || args.no_headers {
        if let Some(sheet) = &args.sheet {
            parameter.sheet_name = Some(sheet.clone());
        }
        if args.no_headers {
            parameter.has_headers = false;
            parameter.data_start_row_index = 0;
        }
        parameter.load_file()?;
        FieldMapper::new().auto_map(&schema, &mut parameter.field_maps);
    }

    if let Some(mode) = args.mode {
        parameter.import_mode = mode;
    }
    if let Some(key) = &args.key {
        parameter.key_property = Some(key.clone());
    }
    if let Some(batch_size) = args.batch_size {
        parameter.batch_size = batch_size;
    }
    if let Some(max_records) = args.max_records {
        parameter.max_records_to_import = max_records;
    }

    for (column, property) in &args.mappings {
        let Some(map) = parameter.field_map_mut(column) else {
            bail!("源文件中没有列 '{}'", column);
        };
        map.target_property = Some(property.clone());
        map.auto_mapped = false;
        map.skip = false;
    }

    if args.preview {
        println!("{}", serde_json::to_string_pretty(&parameter.field_maps)?);
        return Ok(());
    }

    let report = importer.run(&parameter, &schema).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
