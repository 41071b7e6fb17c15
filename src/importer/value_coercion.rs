// ==========================================
// 表格导入管道 - 值类型转换
// ==========================================
// 职责: 将解析出的原始标量转换为目标字段的声明类型
// 流程:
// 1. 解开可空包装
// 2. 缺失值: 默认值 → 可空/引用类型取 Null → 类型零值
// 3. 类型一致 → 原样返回
// 4. 按目标类型分派转换（UUID/枚举/布尔/日期/数值/字符串）
// 红线: 纯函数, 无副作用
// ==========================================

use crate::domain::schema::{EnumType, FieldType};
use crate::domain::types::Value;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

/// 类型转换失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    pub value: String,
    pub target: String,
    pub message: String,
}

impl ConversionError {
    fn new(value: &str, target: &FieldType) -> Self {
        Self {
            value: value.to_string(),
            target: target.to_string(),
            message: format!("Cannot convert '{}' to {}", value, target),
        }
    }

    fn with_detail(value: &str, target: &FieldType, detail: impl std::fmt::Display) -> Self {
        let mut err = Self::new(value, target);
        err.message = format!("{}: {}", err.message, detail);
        err
    }
}

pub type CoercionResult<T> = Result<T, ConversionError>;

/// 字符串 → 日期时间 的可接受格式（按顺序尝试）
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

// 序列日期有效区间（开区间）
const SERIAL_DATE_MIN: f64 = -657_435.0;
const SERIAL_DATE_MAX: f64 = 2_958_466.0;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// 将原始值转换为目标类型
///
/// # 参数
/// - raw: 解析器产出的原始值
/// - target: 目标字段声明类型（可含 Nullable 包装）
/// - default: 字段映射上配置的默认值文本
///
/// # 返回
/// - Ok(Value): 转换后的值（可空/引用类型的缺失值为 Null）
/// - Err(ConversionError): 无法转换
pub fn coerce(raw: &Value, target: &FieldType, default: Option<&str>) -> CoercionResult<Value> {
    let (effective, nullable) = target.underlying();

    if raw.is_blank() {
        if let Some(default) = default.filter(|d| !d.is_empty()) {
            return coerce(&Value::Text(default.to_string()), target, None);
        }
        if nullable || effective.is_reference_type() {
            return Ok(Value::Null);
        }
        return Ok(effective.default_value());
    }

    match effective {
        FieldType::String | FieldType::Nullable(_) => Ok(match raw {
            Value::Text(_) => raw.clone(),
            other => Value::Text(other.to_string()),
        }),
        FieldType::Int32 => to_integer(raw, effective, i32::MIN as i64, i32::MAX as i64),
        FieldType::Int64 => to_integer(raw, effective, i64::MIN, i64::MAX),
        FieldType::Float64 => to_float(raw, effective),
        FieldType::Bool => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            other => {
                let text = other.to_string();
                parse_bool(&text)
                    .map(Value::Bool)
                    .ok_or_else(|| ConversionError::new(&text, effective))
            }
        },
        FieldType::DateTime => to_datetime(raw, effective),
        FieldType::Uuid => match raw {
            Value::Uuid(_) => Ok(raw.clone()),
            other => {
                let text = other.to_string();
                Uuid::parse_str(text.trim())
                    .map(Value::Uuid)
                    .map_err(|e| ConversionError::with_detail(&text, effective, e))
            }
        },
        FieldType::Enum(enum_type) => to_enum(raw, enum_type, effective),
    }
}

/// 布尔文本解析（大小写不敏感, 忽略首尾空白）
///
/// true: true / 1 / yes / y / on
/// false: false / 0 / no / n / off
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// 电子表格序列日期 → 日期时间
///
/// 纪元 1899-12-30; 小数部分为当日时间（按毫秒四舍五入）
/// 负值: 整数部分向前计日, 小数部分仍向后计时
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial <= SERIAL_DATE_MIN || serial >= SERIAL_DATE_MAX {
        return None;
    }

    let rounding = if serial >= 0.0 { 0.5 } else { -0.5 };
    let mut millis = (serial * MILLIS_PER_DAY as f64 + rounding) as i64;
    if millis < 0 {
        millis -= (millis % MILLIS_PER_DAY) * 2;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

fn to_integer(raw: &Value, target: &FieldType, min: i64, max: i64) -> CoercionResult<Value> {
    let text = raw.to_string();
    let value = match raw {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ConversionError::new(&text, target));
            }
            let rounded = f.round_ties_even();
            if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                return Err(ConversionError::with_detail(&text, target, "value out of range"));
            }
            rounded as i64
        }
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| ConversionError::with_detail(&text, target, e))?,
        _ => return Err(ConversionError::new(&text, target)),
    };

    if value < min || value > max {
        return Err(ConversionError::with_detail(&text, target, "value out of range"));
    }
    Ok(Value::Int(value))
}

fn to_float(raw: &Value, target: &FieldType) -> CoercionResult<Value> {
    match raw {
        Value::Float(_) => Ok(raw.clone()),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .or_else(|_| trimmed.replace(',', "").parse::<f64>())
                .map(Value::Float)
                .map_err(|e| ConversionError::with_detail(s, target, e))
        }
        other => Err(ConversionError::new(&other.to_string(), target)),
    }
}

fn to_datetime(raw: &Value, target: &FieldType) -> CoercionResult<Value> {
    let text = raw.to_string();
    match raw {
        Value::DateTime(_) => Ok(raw.clone()),
        Value::Float(serial) => serial_to_datetime(*serial)
            .map(Value::DateTime)
            .ok_or_else(|| ConversionError::with_detail(&text, target, "serial date out of range")),
        Value::Int(serial) => serial_to_datetime(*serial as f64)
            .map(Value::DateTime)
            .ok_or_else(|| ConversionError::with_detail(&text, target, "serial date out of range")),
        Value::Text(s) => parse_datetime(s.trim())
            .map(Value::DateTime)
            .ok_or_else(|| ConversionError::new(&text, target)),
        _ => Err(ConversionError::new(&text, target)),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_enum(raw: &Value, enum_type: &EnumType, target: &FieldType) -> CoercionResult<Value> {
    let text = raw.to_string();
    let wanted = text.trim();

    if let Some(member) = enum_type
        .members
        .iter()
        .find(|m| m.eq_ignore_ascii_case(wanted))
    {
        return Ok(Value::Enum(member.clone()));
    }

    // 数值形式: 成员序号
    wanted
        .parse::<usize>()
        .ok()
        .and_then(|idx| enum_type.members.get(idx))
        .map(|member| Value::Enum(member.clone()))
        .ok_or_else(|| ConversionError::new(&text, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_boolean_like_strings() {
        let truthy = ["true", "TRUE", "1", "yes", "Yes", "y", "Y", "on", "ON"];
        let falsy = ["false", "False", "0", "no", "NO", "n", "N", "off", "Off"];

        for text in truthy {
            assert_eq!(coerce(&Value::from(text), &FieldType::Bool, None), Ok(Value::Bool(true)), "{}", text);
        }
        for text in falsy {
            assert_eq!(coerce(&Value::from(text), &FieldType::Bool, None), Ok(Value::Bool(false)), "{}", text);
        }

        let err = coerce(&Value::from("maybe"), &FieldType::Bool, None).unwrap_err();
        assert_eq!(err.message, "Cannot convert 'maybe' to Boolean");
        assert!(coerce(&Value::Float(2.0), &FieldType::Bool, None).is_err());
        assert_eq!(coerce(&Value::Float(1.0), &FieldType::Bool, None), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_blank_values() {
        let nullable_int = FieldType::nullable(FieldType::Int32);
        assert_eq!(coerce(&Value::Null, &nullable_int, None), Ok(Value::Null));
        assert_eq!(coerce(&Value::from("   "), &nullable_int, None), Ok(Value::Null));
        assert_eq!(coerce(&Value::Null, &FieldType::Int32, None), Ok(Value::Int(0)));
        assert_eq!(coerce(&Value::from(" "), &FieldType::Int32, None), Ok(Value::Int(0)));
        assert_eq!(coerce(&Value::Null, &FieldType::String, None), Ok(Value::Null));
        assert_eq!(coerce(&Value::Null, &FieldType::Bool, None), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_blank_uses_default_value() {
        assert_eq!(coerce(&Value::Null, &FieldType::Int32, Some("99")), Ok(Value::Int(99)));
        assert_eq!(coerce(&Value::from(""), &FieldType::String, Some("n/a")), Ok(Value::from("n/a")));
        // 空默认值视为未配置
        assert_eq!(coerce(&Value::Null, &FieldType::Int32, Some("")), Ok(Value::Int(0)));
        // 默认值本身也要能转换
        assert!(coerce(&Value::Null, &FieldType::Int32, Some("abc")).is_err());
        // 非空原值时忽略默认值
        assert_eq!(coerce(&Value::from("5"), &FieldType::Int32, Some("99")), Ok(Value::Int(5)));
    }

    #[test]
    fn test_integer_conversion() {
        assert_eq!(coerce(&Value::Float(42.0), &FieldType::Int32, None), Ok(Value::Int(42)));
        assert_eq!(coerce(&Value::Float(2.5), &FieldType::Int32, None), Ok(Value::Int(2)));
        assert_eq!(coerce(&Value::Float(3.5), &FieldType::Int64, None), Ok(Value::Int(4)));
        assert_eq!(coerce(&Value::from(" 17 "), &FieldType::Int32, None), Ok(Value::Int(17)));
        assert_eq!(coerce(&Value::Bool(true), &FieldType::Int32, None), Ok(Value::Int(1)));
        assert!(coerce(&Value::from("abc"), &FieldType::Int32, None).is_err());
        assert!(coerce(&Value::from("1.5"), &FieldType::Int32, None).is_err());
        assert!(coerce(&Value::from("3000000000"), &FieldType::Int32, None).is_err());
        assert_eq!(
            coerce(&Value::from("3000000000"), &FieldType::Int64, None),
            Ok(Value::Int(3_000_000_000))
        );
    }

    #[test]
    fn test_int64_float_bounds() {
        // 2^63 超出 i64, 不得饱和为 i64::MAX
        let err = coerce(&Value::Float(9_223_372_036_854_775_808.0), &FieldType::Int64, None)
            .unwrap_err();
        assert!(err.message.contains("value out of range"));

        assert_eq!(
            coerce(&Value::Float(-9_223_372_036_854_775_808.0), &FieldType::Int64, None),
            Ok(Value::Int(i64::MIN))
        );
    }

    #[test]
    fn test_float_conversion() {
        assert_eq!(coerce(&Value::from("9.75"), &FieldType::Float64, None), Ok(Value::Float(9.75)));
        assert_eq!(coerce(&Value::from("1,234.5"), &FieldType::Float64, None), Ok(Value::Float(1234.5)));
        assert_eq!(coerce(&Value::Int(3), &FieldType::Float64, None), Ok(Value::Float(3.0)));

        let err = coerce(&Value::from("twelve"), &FieldType::Float64, None).unwrap_err();
        assert_eq!(err.value, "twelve");
        assert_eq!(err.target, "Double");
    }

    #[test]
    fn test_string_target_stringifies() {
        assert_eq!(coerce(&Value::Float(42.0), &FieldType::String, None), Ok(Value::from("42")));
        assert_eq!(coerce(&Value::Bool(true), &FieldType::String, None), Ok(Value::from("true")));
        assert_eq!(coerce(&Value::from(" keep "), &FieldType::String, None), Ok(Value::from(" keep ")));
    }

    #[test]
    fn test_serial_date_conversion() {
        assert_eq!(serial_to_datetime(45823.0), Some(datetime(2025, 6, 15, 0, 0, 0)));
        assert_eq!(serial_to_datetime(45823.5), Some(datetime(2025, 6, 15, 12, 0, 0)));
        assert_eq!(serial_to_datetime(0.0), Some(datetime(1899, 12, 30, 0, 0, 0)));
        assert_eq!(serial_to_datetime(-1.5), Some(datetime(1899, 12, 29, 12, 0, 0)));
        assert_eq!(serial_to_datetime(3_000_000.0), None);
        assert_eq!(serial_to_datetime(f64::NAN), None);

        assert_eq!(
            coerce(&Value::Float(45823.0), &FieldType::DateTime, None),
            Ok(Value::DateTime(datetime(2025, 6, 15, 0, 0, 0)))
        );
    }

    #[test]
    fn test_datetime_from_text() {
        let target = FieldType::nullable(FieldType::DateTime);
        assert_eq!(
            coerce(&Value::from("2025-06-15"), &target, None),
            Ok(Value::DateTime(datetime(2025, 6, 15, 0, 0, 0)))
        );
        assert_eq!(
            coerce(&Value::from("2025-06-15 08:30:00"), &target, None),
            Ok(Value::DateTime(datetime(2025, 6, 15, 8, 30, 0)))
        );
        assert_eq!(
            coerce(&Value::from("06/15/2025"), &target, None),
            Ok(Value::DateTime(datetime(2025, 6, 15, 0, 0, 0)))
        );
        assert!(coerce(&Value::from("yesterday"), &target, None).is_err());
    }

    #[test]
    fn test_uuid_and_enum() {
        let id = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
        assert_eq!(
            coerce(&Value::from(id), &FieldType::Uuid, None),
            Ok(Value::Uuid(Uuid::parse_str(id).unwrap()))
        );
        assert!(coerce(&Value::from("not-a-uuid"), &FieldType::Uuid, None).is_err());

        let kind = FieldType::Enum(EnumType::new("ContactKind", &["Person", "Company"]));
        assert_eq!(coerce(&Value::from("company"), &kind, None), Ok(Value::Enum("Company".into())));
        assert_eq!(coerce(&Value::Float(0.0), &kind, None), Ok(Value::Enum("Person".into())));
        let err = coerce(&Value::from("robot"), &kind, None).unwrap_err();
        assert_eq!(err.message, "Cannot convert 'robot' to ContactKind");
    }

    #[test]
    fn test_identity_for_matching_types() {
        let dt = Value::DateTime(datetime(2024, 1, 2, 3, 4, 5));
        assert_eq!(coerce(&dt, &FieldType::DateTime, None), Ok(dt.clone()));
        assert_eq!(coerce(&Value::Float(1.25), &FieldType::Float64, None), Ok(Value::Float(1.25)));
        assert_eq!(coerce(&Value::Bool(false), &FieldType::Bool, None), Ok(Value::Bool(false)));
    }
}
