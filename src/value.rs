//! Typed column values and coercion from source JSON

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::error::CoercionError;
use crate::schema::ValueType;

/// A value coerced to its column's type
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Bool(bool),
    Json(JsonValue),
}

impl FieldValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Decimal(_) => ValueType::Decimal,
            Self::Text(_) => ValueType::String,
            Self::Date(_) => ValueType::Date,
            Self::Bool(_) => ValueType::Bool,
            Self::Json(_) => ValueType::Json,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce a source value to `ty`.
    ///
    /// `Ok(None)` means the source value is null (or blank text) and the
    /// column should stay NULL.
    pub fn coerce(value: &JsonValue, ty: ValueType) -> Result<Option<Self>, CoercionError> {
        if let JsonValue::String(s) = value {
            if s.trim().is_empty() {
                return Ok(None);
            }
        }
        if value.is_null() {
            return Ok(None);
        }

        let fail = || CoercionError::new(ty, render_raw(value).unwrap_or_default());

        let coerced = match ty {
            ValueType::String => match value {
                JsonValue::String(s) => Self::Text(s.trim().to_string()),
                JsonValue::Number(n) => Self::Text(n.to_string()),
                JsonValue::Bool(b) => Self::Text(b.to_string()),
                _ => return Err(fail()),
            },
            ValueType::Int => Self::Int(coerce_int(value).ok_or_else(fail)?),
            ValueType::Decimal => Self::Decimal(coerce_decimal(value).ok_or_else(fail)?),
            ValueType::Date => match value {
                JsonValue::String(s) => Self::Date(parse_date(s).ok_or_else(fail)?),
                _ => return Err(fail()),
            },
            ValueType::Bool => Self::Bool(coerce_bool(value).ok_or_else(fail)?),
            ValueType::Json => match value {
                JsonValue::String(s) => Self::Json(
                    serde_json::from_str::<JsonValue>(s)
                        .ok()
                        .filter(|v| v.is_object() || v.is_array())
                        .unwrap_or_else(|| value.clone()),
                ),
                other => Self::Json(other.clone()),
            },
        };
        Ok(Some(coerced))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Decimal(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Stringify a raw source value for `property_attribute.attr_value`.
///
/// Strings are stored without quotes, objects and arrays as JSON text,
/// null as SQL NULL.
pub fn render_raw(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Array(_) | JsonValue::Object(_) => Some(value.to_string()),
    }
}

fn strip_number(s: &str) -> String {
    s.trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect()
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn coerce_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => parse_decimal(&n.to_string()),
        JsonValue::String(s) => parse_decimal(&strip_number(s)),
        _ => None,
    }
}

fn coerce_int(value: &JsonValue) -> Option<i64> {
    if let JsonValue::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }
    let d = coerce_decimal(value)?;
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

fn coerce_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| NaiveDate::parse_from_str(s, "%m/%d/%Y").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coerce(value: JsonValue, ty: ValueType) -> Option<FieldValue> {
        FieldValue::coerce(&value, ty).unwrap()
    }

    #[test]
    fn ints_accept_numeric_text_and_whole_floats() {
        assert_eq!(coerce(json!(3), ValueType::Int), Some(FieldValue::Int(3)));
        assert_eq!(coerce(json!("1,850"), ValueType::Int), Some(FieldValue::Int(1850)));
        assert_eq!(coerce(json!(4.0), ValueType::Int), Some(FieldValue::Int(4)));
        assert_eq!(coerce(json!(" 12 "), ValueType::Int), Some(FieldValue::Int(12)));
    }

    #[test]
    fn ints_reject_words_and_fractions() {
        let err = FieldValue::coerce(&json!("three"), ValueType::Int).unwrap_err();
        assert_eq!(err.raw, "three");
        assert_eq!(err.expected, ValueType::Int);
        assert!(FieldValue::coerce(&json!(2.5), ValueType::Int).is_err());
        assert!(FieldValue::coerce(&json!(true), ValueType::Int).is_err());
    }

    #[test]
    fn decimals_strip_currency() {
        assert_eq!(
            coerce(json!("$315,000.50"), ValueType::Decimal),
            Some(FieldValue::Decimal(Decimal::new(31500050, 2)))
        );
        assert_eq!(
            coerce(json!(2.5), ValueType::Decimal),
            Some(FieldValue::Decimal(Decimal::new(25, 1)))
        );
        assert!(FieldValue::coerce(&json!("n/a"), ValueType::Decimal).is_err());
    }

    #[test]
    fn dates_accept_common_formats() {
        let expected = Some(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));
        assert_eq!(coerce(json!("2024-03-15"), ValueType::Date), expected);
        assert_eq!(coerce(json!("2024-03-15T10:30:00Z"), ValueType::Date), expected);
        assert_eq!(coerce(json!("2024-03-15 10:30:00"), ValueType::Date), expected);
        assert_eq!(coerce(json!("03/15/2024"), ValueType::Date), expected);
        assert!(FieldValue::coerce(&json!("last spring"), ValueType::Date).is_err());
        assert!(FieldValue::coerce(&json!(20240315), ValueType::Date).is_err());
    }

    #[test]
    fn bools() {
        assert_eq!(coerce(json!("Yes"), ValueType::Bool), Some(FieldValue::Bool(true)));
        assert_eq!(coerce(json!(0), ValueType::Bool), Some(FieldValue::Bool(false)));
        assert!(FieldValue::coerce(&json!(2), ValueType::Bool).is_err());
    }

    #[test]
    fn strings_are_trimmed_and_numbers_rendered() {
        assert_eq!(
            coerce(json!("  02139 "), ValueType::String),
            Some(FieldValue::Text("02139".into()))
        );
        assert_eq!(coerce(json!(78704), ValueType::String), Some(FieldValue::Text("78704".into())));
        assert!(FieldValue::coerce(&json!({"a": 1}), ValueType::String).is_err());
    }

    #[test]
    fn json_parses_embedded_text() {
        assert_eq!(
            coerce(json!("{\"paint\": 500}"), ValueType::Json),
            Some(FieldValue::Json(json!({"paint": 500})))
        );
        assert_eq!(
            coerce(json!("see notes"), ValueType::Json),
            Some(FieldValue::Json(json!("see notes")))
        );
    }

    #[test]
    fn null_and_blank_stay_null() {
        assert_eq!(coerce(JsonValue::Null, ValueType::Int), None);
        assert_eq!(coerce(json!("   "), ValueType::Date), None);
    }

    #[test]
    fn render_raw_keeps_strings_unquoted() {
        assert_eq!(render_raw(&json!("three")).as_deref(), Some("three"));
        assert_eq!(render_raw(&json!([1, 2])).as_deref(), Some("[1,2]"));
        assert_eq!(render_raw(&json!({"b": 1})).as_deref(), Some("{\"b\":1}"));
        assert_eq!(render_raw(&JsonValue::Null), None);
    }
}
