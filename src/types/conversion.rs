//! # 宽松值转换
//!
//! 历史数据中数字和布尔值常以字符串形式出现（`"10"`、`"true"`、`""`），
//! 这里是唯一做字符串到数值/布尔归一化的地方。记录类型通过
//! `#[serde(deserialize_with = "...")]` 引用下面的辅助函数。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ConversionError;

/// 宽松解析 i64：数字、数字字符串、浮点（截断）；空串和 null 视为 0
pub fn coerce_i64(value: &Value) -> Result<i64, ConversionError> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ConversionError::invalid(n.to_string(), "整数")),
        Value::String(s) => parse_i64_str(s),
        other => Err(ConversionError::invalid(other.to_string(), "整数")),
    }
}

/// 从字符串解析 i64，`Redis HGETALL` 返回的计数器走这里
pub fn parse_i64_str(s: &str) -> Result<i64, ConversionError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .or_else(|_| trimmed.parse::<f64>().map(|f| f as i64))
        .map_err(|_| ConversionError::invalid(s, "整数"))
}

/// 宽松解析 f64
pub fn coerce_f64(value: &Value) -> Result<f64, ConversionError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConversionError::invalid(n.to_string(), "浮点数")),
        Value::String(s) => parse_f64_str(s),
        other => Err(ConversionError::invalid(other.to_string(), "浮点数")),
    }
}

pub fn parse_f64_str(s: &str) -> Result<f64, ConversionError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| ConversionError::invalid(s, "浮点数"))
}

/// 宽松解析布尔：`true/false/1/0/yes/no`，空串和 null 为 false
pub fn coerce_bool(value: &Value) -> Result<bool, ConversionError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "no" | "off" => Ok(false),
            "true" | "1" | "yes" | "on" => Ok(true),
            _ => Err(ConversionError::invalid(s.as_str(), "布尔值")),
        },
        other => Err(ConversionError::invalid(other.to_string(), "布尔值")),
    }
}

/// 可选时间：RFC3339 字符串或毫秒时间戳，空串/null 为 `None`
pub fn coerce_opt_datetime(value: &Value) -> Result<Option<DateTime<Utc>>, ConversionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .or_else(|_| {
                let millis = parse_i64_str(s)?;
                Ok(DateTime::from_timestamp_millis(millis))
            }),
        Value::Number(_) => Ok(DateTime::from_timestamp_millis(coerce_i64(value)?)),
        other => Err(ConversionError::invalid(other.to_string(), "时间")),
    }
}

/// 字符串数组：JSON 数组、JSON 数组文本或逗号分隔字符串
pub fn coerce_string_list(value: &Value) -> Result<Vec<String>, ConversionError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Vec::new())
            } else if trimmed.starts_with('[') {
                coerce_string_list(&serde_json::from_str::<Value>(trimmed)?)
            } else {
                Ok(trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect())
            }
        }
        other => Err(ConversionError::invalid(other.to_string(), "字符串数组")),
    }
}

/// serde `deserialize_with` 入口
pub mod loose {
    use super::{
        Deserialize, Deserializer, Value, coerce_bool, coerce_f64, coerce_i64,
        coerce_opt_datetime, coerce_string_list,
    };
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;

    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        coerce_i64(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let v = coerce_i64(&Value::deserialize(d)?).map_err(D::Error::custom)?;
        Ok(u64::try_from(v).unwrap_or(0))
    }

    pub fn i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        let v = coerce_i64(&Value::deserialize(d)?).map_err(D::Error::custom)?;
        i32::try_from(v).map_err(D::Error::custom)
    }

    pub fn f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        coerce_f64(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        coerce_bool(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn opt_datetime<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        coerce_opt_datetime(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        coerce_string_list(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    /// 空字符串视为 `None`
    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }
}
