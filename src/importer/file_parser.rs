// ==========================================
// 表格导入管道 - 表格文档解析器
// ==========================================
// 支持: Excel (.xlsx/.xls) / CSV (.csv), 按文件名扩展名识别
// 职责:
// - 读取工作表列表与表头/样例行（供字段映射预览）
// - 按导入参数抽取数据行（ParsedRow）
// 坐标: 行列号均为工作表绝对坐标（0 起）
// ==========================================

use crate::domain::import::{FieldMap, ImportParameter};
use crate::domain::types::{ParsedRow, Value};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::value_coercion::serial_to_datetime;
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsx};
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use std::io::{Cursor, Read, Seek};
use tracing::{debug, instrument};

/// CSV 文档的唯一工作表名称
pub const CSV_SHEET_NAME: &str = "Sheet1";

// ==========================================
// DocumentFormat - 文档格式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Xlsx,
    Xls,
    Csv,
}

impl DocumentFormat {
    /// 按扩展名识别（大小写不敏感）; 未知扩展名按 XLSX 处理
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "xls" => DocumentFormat::Xls,
            "csv" => DocumentFormat::Csv,
            _ => DocumentFormat::Xlsx,
        }
    }
}

// ==========================================
// SheetGrid - 单个工作表的单元格网格
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct SheetGrid {
    name: String,
    rows: Vec<Vec<Value>>, // 截止到已用区域最后一行
    width: usize,          // 已用区域的列数（含左侧空列）
}

impl SheetGrid {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        Self {
            name: name.into(),
            rows,
            width,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// 无任何已用单元格
    pub fn is_empty(&self) -> bool {
        self.width == 0
    }

    /// 读取单元格; 越界视为空
    pub fn cell(&self, row: usize, col: usize) -> &Value {
        const EMPTY: &Value = &Value::Null;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(EMPTY)
    }

    /// 生成列名
    ///
    /// # 说明
    /// - 表头模式: 取表头行单元格文本; 空白单元格 → Column<N>
    /// - 非表头模式: 全部为 Column<N>
    pub fn column_names(&self, header_row: Option<usize>) -> Vec<String> {
        (0..self.width)
            .map(|col| {
                header_row
                    .map(|row| self.cell(row, col).to_string().trim().to_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("Column{}", col))
            })
            .collect()
    }

    /// 抽取数据行（跳过整行为空的行）
    pub fn data_rows(&self, columns: &[String], data_start_row: usize) -> Vec<ParsedRow> {
        (data_start_row..self.rows.len())
            .filter_map(|row_index| {
                let mut row = ParsedRow::new(row_index);
                for (col, column) in columns.iter().enumerate() {
                    row.insert(column.clone(), self.cell(row_index, col).clone());
                }
                row.has_data().then_some(row)
            })
            .collect()
    }
}

// ==========================================
// Workbook - 已载入的文档
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<SheetGrid>,
}

impl Workbook {
    pub fn new(sheets: Vec<SheetGrid>) -> Self {
        Self { sheets }
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// 选择工作表: 指定名称存在时取该表, 否则取第一个
    pub fn select_sheet(&self, name: Option<&str>) -> Option<&SheetGrid> {
        name.filter(|n| !n.is_empty())
            .and_then(|n| self.sheets.iter().find(|s| s.name == n))
            .or_else(|| self.sheets.first())
    }
}

// ==========================================
// DocumentReader - 字节 → Workbook
// ==========================================
pub trait DocumentReader {
    fn read(&self, bytes: &[u8]) -> ImportResult<Workbook>;
}

// ==========================================
// Excel Reader 实现
// ==========================================
pub struct ExcelReader {
    legacy: bool, // true = .xls
}

impl ExcelReader {
    pub fn xlsx() -> Self {
        Self { legacy: false }
    }

    pub fn xls() -> Self {
        Self { legacy: true }
    }
}

impl DocumentReader for ExcelReader {
    fn read(&self, bytes: &[u8]) -> ImportResult<Workbook> {
        let cursor = Cursor::new(bytes);
        if self.legacy {
            let workbook: Xls<_> = open_workbook_from_rs(cursor)?;
            load_sheets(workbook)
        } else {
            let workbook: Xlsx<_> = open_workbook_from_rs(cursor)?;
            load_sheets(workbook)
        }
    }
}

fn load_sheets<RS, R>(mut workbook: R) -> ImportResult<Workbook>
where
    RS: Read + Seek,
    R: Reader<RS>,
    ImportError: From<R::Error>,
{
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;

        // 绝对坐标: 从 (0,0) 到已用区域右下角
        let rows = match range.end() {
            Some((end_row, end_col)) => (0..=end_row)
                .map(|r| {
                    (0..=end_col)
                        .map(|c| range.get_value((r, c)).map(cell_value).unwrap_or(Value::Null))
                        .collect::<Vec<Value>>()
                })
                .collect(),
            None => Vec::new(),
        };
        sheets.push(SheetGrid::new(name, rows));
    }
    Ok(Workbook::new(sheets))
}

/// Excel 单元格 → Value
///
/// 数值一律为 Float; 日期单元格按序列日期转换
fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(i) => Value::Float(*i as f64),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => serial_to_datetime(dt.as_f64())
            .map(Value::DateTime)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(e) => Value::Text(format!("{:?}", e)),
    }
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ==========================================
// CSV Reader 实现
// ==========================================
pub struct CsvReader;

impl DocumentReader for CsvReader {
    fn read(&self, bytes: &[u8]) -> ImportResult<Workbook> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .from_reader(bytes);

        // csv 会跳过空行; 按记录起始行号（1 起）落位, 空行补为空行
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 1);
            while rows.len() + 1 < line {
                rows.push(Vec::new());
            }
            rows.push(record.iter().map(infer_csv_cell).collect());
        }

        // 去掉尾部空行, 与 Excel 已用区域语义一致
        while rows
            .last()
            .map(|r: &Vec<Value>| r.iter().all(Value::is_null))
            .unwrap_or(false)
        {
            rows.pop();
        }

        Ok(Workbook::new(vec![SheetGrid::new(CSV_SHEET_NAME, rows)]))
    }
}

/// CSV 文本单元格类型推断
///
/// - 空白 → Null
/// - true/false（大小写不敏感）→ Bool
/// - 有限数值 → Float（前导 0 的数字串保留为文本, 如编码 "007"）
/// - 其余 → Text
fn infer_csv_cell(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    let digits = trimmed.trim_start_matches(|c| c == '-' || c == '+');
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    let numeric_shape = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));

    // 数值按 f64 保存, 原文本不保留: 目标为 String 时 "1.50" → "1.5", "1e3" → "1000"
    if numeric_shape && !leading_zero {
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return Value::Float(n);
            }
        }
    }
    Value::Text(text.to_string())
}

// ==========================================
// TabularParser - 按格式分派的解析入口
// ==========================================

/// 表头与样例行（字段映射预览）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetadata {
    pub sheet_names: Vec<String>,
    pub selected_sheet: Option<String>,
    pub header_row: Option<Vec<String>>,
    pub sample_row: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TabularParser;

impl TabularParser {
    pub fn new() -> Self {
        Self
    }

    /// 载入文档
    ///
    /// # 参数
    /// - bytes: 文件内容
    /// - file_name: 文件名（仅用于识别格式）
    pub fn open(&self, bytes: &[u8], file_name: &str) -> ImportResult<Workbook> {
        let format = DocumentFormat::from_file_name(file_name);
        debug!(file_name, ?format, size = bytes.len(), "载入表格文档");
        match format {
            DocumentFormat::Csv => CsvReader.read(bytes),
            DocumentFormat::Xls => ExcelReader::xls().read(bytes),
            DocumentFormat::Xlsx => ExcelReader::xlsx().read(bytes),
        }
    }

    fn open_parameter(&self, parameter: &ImportParameter) -> ImportResult<Option<Workbook>> {
        match &parameter.file_content {
            Some(bytes) if !bytes.is_empty() => {
                let file_name = parameter.file_name.as_deref().unwrap_or("file.xlsx");
                self.open(bytes, file_name).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// 读取工作表列表、表头行与样例行
    ///
    /// # 返回
    /// - 无内容时返回空元数据
    pub fn load_metadata(&self, parameter: &ImportParameter) -> ImportResult<DocumentMetadata> {
        let Some(workbook) = self.open_parameter(parameter)? else {
            return Ok(DocumentMetadata::default());
        };

        let mut metadata = DocumentMetadata {
            sheet_names: workbook.sheet_names(),
            ..Default::default()
        };

        if let Some(sheet) = workbook.select_sheet(parameter.sheet_name.as_deref()) {
            metadata.selected_sheet = Some(sheet.name().to_string());
            if !sheet.is_empty() {
                let header_row = parameter.has_headers.then_some(parameter.header_row_index);
                metadata.header_row = Some(sheet.column_names(header_row));
                metadata.sample_row = Some(
                    (0..sheet.width())
                        .map(|col| sheet.cell(parameter.data_start_row_index, col).to_string())
                        .collect(),
                );
            }
        }
        Ok(metadata)
    }

    /// 按导入参数抽取数据行
    ///
    /// # 返回
    /// - 无内容 / 无工作表 / 空工作表 → 空序列
    /// - Err(DocumentParseError): 文档损坏
    #[instrument(skip(self, parameter), fields(file_name = ?parameter.file_name))]
    pub fn parse_rows(&self, parameter: &ImportParameter) -> ImportResult<Vec<ParsedRow>> {
        let Some(workbook) = self.open_parameter(parameter)? else {
            return Ok(Vec::new());
        };
        let Some(sheet) = workbook.select_sheet(parameter.sheet_name.as_deref()) else {
            return Ok(Vec::new());
        };

        let header_row = parameter.has_headers.then_some(parameter.header_row_index);
        let columns = sheet.column_names(header_row);
        let rows = sheet.data_rows(&columns, parameter.data_start_row_index);

        debug!(
            sheet = sheet.name(),
            columns = columns.len(),
            rows = rows.len(),
            "数据行抽取完成"
        );
        Ok(rows)
    }

    /// 将文档结构载入导入参数
    ///
    /// # 说明
    /// - 刷新 available_sheets
    /// - sheet_name 未指定时选中第一个工作表（已指定则保留）
    /// - 按表头重建 field_maps, 样例值取首个数据行
    pub fn load_file_into_parameter(&self, parameter: &mut ImportParameter) -> ImportResult<()> {
        if !parameter.has_content() {
            return Ok(());
        }

        let metadata = self.load_metadata(parameter)?;
        parameter.available_sheets = metadata.sheet_names;
        if parameter.sheet_name.as_deref().unwrap_or("").is_empty() {
            parameter.sheet_name = parameter.available_sheets.first().cloned();
        }

        let (Some(headers), Some(samples)) = (metadata.header_row, metadata.sample_row) else {
            return Ok(());
        };
        parameter.field_maps = headers
            .into_iter()
            .zip(samples)
            .map(|(column, sample)| FieldMap {
                sample_value: Some(sample),
                ..FieldMap::new(column)
            })
            .collect();
        Ok(())
    }
}

impl ImportParameter {
    /// 载入文件结构（工作表列表与字段映射）
    pub fn load_file(&mut self) -> ImportResult<()> {
        TabularParser::new().load_file_into_parameter(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_parameter(content: &str) -> ImportParameter {
        ImportParameter::new("data.csv", content.as_bytes().to_vec())
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(DocumentFormat::from_file_name("a.CSV"), DocumentFormat::Csv);
        assert_eq!(DocumentFormat::from_file_name("a.xls"), DocumentFormat::Xls);
        assert_eq!(DocumentFormat::from_file_name("a.XLSX"), DocumentFormat::Xlsx);
        assert_eq!(DocumentFormat::from_file_name("noext"), DocumentFormat::Xlsx);
        assert_eq!(DocumentFormat::from_file_name("a.ods"), DocumentFormat::Xlsx);
    }

    #[test]
    fn test_csv_cell_inference() {
        assert_eq!(infer_csv_cell(""), Value::Null);
        assert_eq!(infer_csv_cell("   "), Value::Null);
        assert_eq!(infer_csv_cell("TRUE"), Value::Bool(true));
        assert_eq!(infer_csv_cell("12.5"), Value::Float(12.5));
        assert_eq!(infer_csv_cell("-3"), Value::Float(-3.0));
        assert_eq!(infer_csv_cell("0.5"), Value::Float(0.5));
        assert_eq!(infer_csv_cell("007"), Value::from("007"));
        assert_eq!(infer_csv_cell("1.50"), Value::Float(1.5));
        assert_eq!(infer_csv_cell("1e3"), Value::Float(1000.0));
        assert_eq!(infer_csv_cell("abc"), Value::from("abc"));
        assert_eq!(infer_csv_cell("inf"), Value::from("inf"));
        assert_eq!(infer_csv_cell("1,234"), Value::from("1,234"));
    }

    #[test]
    fn test_parse_csv_rows_with_headers() {
        let parameter = csv_parameter("Code,Name,Quantity\nA1,Widget,5\n,,\nB2,Gadget,\n");
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();

        // 全空行被跳过; 行号为源文件绝对行号
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index(), 1);
        assert_eq!(rows[1].row_index(), 3);
        assert_eq!(rows[0].get("code"), Some(&Value::from("A1")));
        assert_eq!(rows[0].get("Quantity"), Some(&Value::Float(5.0)));
        assert_eq!(rows[1].get("Quantity"), Some(&Value::Null));
    }

    #[test]
    fn test_csv_blank_lines_keep_file_row_index() {
        let parameter = csv_parameter("Code,Quantity\n\nA1,lots\n\n\nB2,3\n");
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index(), 2);
        assert_eq!(rows[0].get("Quantity"), Some(&Value::from("lots")));
        assert_eq!(rows[1].row_index(), 5);
    }

    #[test]
    fn test_csv_leading_blank_line_before_header() {
        let mut parameter = csv_parameter("\nCode,Quantity\nA1,5\n");
        parameter.header_row_index = 1;
        parameter.data_start_row_index = 2;
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_index(), 2);
        assert_eq!(rows[0].get("Code"), Some(&Value::from("A1")));
        assert_eq!(rows[0].get("Quantity"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_xlsx_date_cell_and_blank_middle_row() {
        use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

        let mut workbook = XlsxWorkbook::new();
        let worksheet = workbook.add_worksheet();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        worksheet.write_string(0, 0, "Code").unwrap();
        worksheet.write_string(0, 1, "ReleasedAt").unwrap();
        worksheet.write_string(2, 0, "A1").unwrap();
        worksheet
            .write_number_with_format(2, 1, 45823.0, &date_format)
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let parameter = ImportParameter::new("dates.xlsx", bytes);
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();

        let expected = chrono::NaiveDate::from_ymd_opt(2025, 6, 15)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_index(), 2);
        assert_eq!(rows[0].get("ReleasedAt"), Some(&Value::DateTime(expected)));
    }

    #[test]
    fn test_iso_datetime_cell() {
        let expected = chrono::NaiveDate::from_ymd_opt(2025, 6, 15)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .unwrap();
        assert_eq!(
            cell_value(&Data::DateTimeIso("2025-06-15T08:30:00".to_string())),
            Value::DateTime(expected)
        );
        assert_eq!(
            cell_value(&Data::DateTimeIso("2025-06-15".to_string())),
            Value::DateTime(expected.date().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            cell_value(&Data::DateTimeIso("soon".to_string())),
            Value::from("soon")
        );
    }

    #[test]
    fn test_blank_header_and_headerless_mode() {
        let mut parameter = csv_parameter("Code,,Price\nA1,x,2\n");
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();
        assert_eq!(rows[0].get("Column1"), Some(&Value::from("x")));

        parameter.has_headers = false;
        parameter.data_start_row_index = 0;
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Column0"), Some(&Value::from("Code")));
        assert_eq!(rows[1].get("Column2"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn test_headers_only_and_empty_content() {
        let rows = TabularParser::new()
            .parse_rows(&csv_parameter("Code,Name\n"))
            .unwrap();
        assert!(rows.is_empty());

        let empty = ImportParameter::default();
        assert!(TabularParser::new().parse_rows(&empty).unwrap().is_empty());
        assert_eq!(
            TabularParser::new().load_metadata(&empty).unwrap(),
            DocumentMetadata::default()
        );
    }

    #[test]
    fn test_malformed_xlsx_is_parse_error() {
        let parameter = ImportParameter::new("broken.xlsx", b"not a zip archive".to_vec());
        let err = TabularParser::new().parse_rows(&parameter).unwrap_err();
        assert!(matches!(err, ImportError::DocumentParseError(_)));
    }

    #[test]
    fn test_load_file_into_parameter() {
        let mut parameter = csv_parameter("Code,Unit Price\nA1,9.5\nB2,3\n");
        parameter.load_file().unwrap();

        assert_eq!(parameter.available_sheets, vec![CSV_SHEET_NAME.to_string()]);
        assert_eq!(parameter.sheet_name.as_deref(), Some(CSV_SHEET_NAME));
        assert_eq!(parameter.field_maps.len(), 2);
        assert_eq!(parameter.field_maps[1].source_column, "Unit Price");
        assert_eq!(parameter.field_maps[1].sample_value.as_deref(), Some("9.5"));
        assert!(parameter.field_maps.iter().all(|m| m.target_property.is_none()));
    }

    #[test]
    fn test_missing_sheet_falls_back_to_first() {
        let mut parameter = csv_parameter("Code\nA1\n");
        parameter.sheet_name = Some("Missing".to_string());
        let rows = TabularParser::new().parse_rows(&parameter).unwrap();
        assert_eq!(rows.len(), 1);

        parameter.load_file().unwrap();
        assert_eq!(parameter.sheet_name.as_deref(), Some("Missing"));
    }
}
