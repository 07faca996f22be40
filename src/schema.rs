//! Relational schema catalogue
//!
//! Mirrors `migrations/001_property_schema.sql`. The mapping loader checks
//! spreadsheet targets against this catalogue, the resolver takes a column's
//! value type from it when the spreadsheet gives no hint, and the sinks use
//! the limits to reject values the database would refuse.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::mapping::normalize_key;
use crate::value::FieldValue;

/// DDL applied at start-up
pub const SCHEMA_SQL: &str = include_str!("../migrations/001_property_schema.sql");

/// Name of the sparse key/value table for unmapped fields
pub const ATTRIBUTE_TABLE: &str = "property_attribute";

/// Maximum length of `property_attribute.attr_key`
pub const ATTRIBUTE_KEY_MAX: usize = 200;

/// Column of `property` that identifies a source record
pub const EXTERNAL_ID_COLUMN: &str = "external_id";

/// Value type a column accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Decimal,
    String,
    Date,
    Bool,
    Json,
}

impl ValueType {
    /// Parse a spreadsheet type hint; `None` for anything unrecognised
    pub fn from_hint(hint: &str) -> Option<Self> {
        match normalize_key(hint).as_str() {
            "int" | "integer" | "bigint" | "smallint" | "int64" | "whole_number" => Some(Self::Int),
            "decimal" | "numeric" | "float" | "double" | "number" | "money" | "currency" => {
                Some(Self::Decimal)
            }
            "string" | "str" | "text" | "varchar" | "char" => Some(Self::String),
            "date" | "datetime" | "timestamp" => Some(Self::Date),
            "bool" | "boolean" | "flag" => Some(Self::Bool),
            "json" | "jsonb" | "object" | "dict" => Some(Self::Json),
            _ => None,
        }
    }

    /// Whether a value of type `self` can be stored in a column of type `column`
    pub fn fits(self, column: ValueType) -> bool {
        self == column || matches!((self, column), (ValueType::Int, ValueType::Decimal))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Date => "date",
            Self::Bool => "bool",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database-side limit on a column's values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLimit {
    Unbounded,
    /// VARCHAR(n)
    Chars(usize),
    /// NUMERIC(precision, scale)
    Numeric { precision: u32, scale: u32 },
    /// INTEGER
    Int32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub value_type: ValueType,
    pub limit: ColumnLimit,
}

const fn col(name: &'static str, value_type: ValueType, limit: ColumnLimit) -> ColumnDef {
    ColumnDef {
        name,
        value_type,
        limit,
    }
}

impl ColumnDef {
    /// Check a value against this column's limit, mirroring what PostgreSQL
    /// would reject on insert
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match (self.limit, value) {
            (ColumnLimit::Chars(max), FieldValue::Text(s)) => {
                let len = s.chars().count();
                if len > max {
                    return Err(format!("value of {} characters exceeds VARCHAR({})", len, max));
                }
            }
            (ColumnLimit::Int32, FieldValue::Int(v)) => {
                if i32::try_from(*v).is_err() {
                    return Err(format!("{} is out of range for INTEGER", v));
                }
            }
            (ColumnLimit::Numeric { precision, scale }, FieldValue::Decimal(d)) => {
                check_numeric(*d, precision, scale)?;
            }
            (ColumnLimit::Numeric { precision, scale }, FieldValue::Int(v)) => {
                check_numeric(Decimal::from(*v), precision, scale)?;
            }
            _ => {}
        }
        if !value.value_type().fits(self.value_type) {
            return Err(format!(
                "{} value does not fit {} column",
                value.value_type(),
                self.value_type
            ));
        }
        Ok(())
    }
}

/// PostgreSQL rounds to the column scale (half away from zero) before it
/// checks the precision, so `99.97` overflows `NUMERIC(3,1)`.
fn check_numeric(d: Decimal, precision: u32, scale: u32) -> Result<(), String> {
    let rounded = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    let integer_digits = rounded
        .abs()
        .trunc()
        .to_string()
        .trim_start_matches('0')
        .len() as u32;
    if integer_digits > precision - scale {
        return Err(format!(
            "{} overflows NUMERIC({},{})",
            d, precision, scale
        ));
    }
    Ok(())
}

use ColumnLimit::{Chars, Int32, Numeric, Unbounded};
use ValueType as T;

const PROPERTY_COLUMNS: &[ColumnDef] = &[
    col("external_id", T::String, Chars(128)),
    col("address_line1", T::String, Chars(255)),
    col("address_line2", T::String, Chars(255)),
    col("city", T::String, Chars(100)),
    col("state", T::String, Chars(100)),
    col("postal_code", T::String, Chars(20)),
    col("county", T::String, Chars(100)),
    col("latitude", T::Decimal, Numeric { precision: 9, scale: 6 }),
    col("longitude", T::Decimal, Numeric { precision: 9, scale: 6 }),
];

const PROPERTY_DETAIL_COLUMNS: &[ColumnDef] = &[
    col("bedrooms", T::Int, Int32),
    col("bathrooms", T::Decimal, Numeric { precision: 3, scale: 1 }),
    col("sqft", T::Int, Int32),
    col("year_built", T::Int, Int32),
    col("property_type", T::String, Chars(100)),
    col("zoning", T::String, Chars(50)),
];

const VALUATION_COLUMNS: &[ColumnDef] = &[
    col("valuation_source", T::String, Chars(100)),
    col("valuation_amount", T::Decimal, Numeric { precision: 15, scale: 2 }),
    col("valuation_date", T::Date, Unbounded),
    col("notes", T::String, Unbounded),
];

const HOA_COLUMNS: &[ColumnDef] = &[
    col("has_hoa", T::Bool, Unbounded),
    col("hoa_name", T::String, Chars(255)),
    col("hoa_fee_amount", T::Decimal, Numeric { precision: 12, scale: 2 }),
    col("hoa_fee_frequency", T::String, Chars(50)),
];

const REHAB_ESTIMATE_COLUMNS: &[ColumnDef] = &[
    col("estimate_total", T::Decimal, Numeric { precision: 15, scale: 2 }),
    col("estimate_breakdown", T::Json, Unbounded),
    col("last_updated", T::Date, Unbounded),
];

/// Tables a mapping row may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTable {
    Property,
    PropertyDetail,
    Valuation,
    Hoa,
    RehabEstimate,
}

impl TargetTable {
    pub const ALL: [TargetTable; 5] = [
        TargetTable::Property,
        TargetTable::PropertyDetail,
        TargetTable::Valuation,
        TargetTable::Hoa,
        TargetTable::RehabEstimate,
    ];

    /// Detail tables, written after the property row
    pub const DETAILS: [TargetTable; 4] = [
        TargetTable::PropertyDetail,
        TargetTable::Valuation,
        TargetTable::Hoa,
        TargetTable::RehabEstimate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::PropertyDetail => "property_detail",
            Self::Valuation => "valuation",
            Self::Hoa => "hoa",
            Self::RehabEstimate => "rehab_estimate",
        }
    }

    /// Parse a spreadsheet table name (case and separator insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let key = normalize_key(name);
        Self::ALL.into_iter().find(|t| t.as_str() == key)
    }

    pub fn columns(self) -> &'static [ColumnDef] {
        match self {
            Self::Property => PROPERTY_COLUMNS,
            Self::PropertyDetail => PROPERTY_DETAIL_COLUMNS,
            Self::Valuation => VALUATION_COLUMNS,
            Self::Hoa => HOA_COLUMNS,
            Self::RehabEstimate => REHAB_ESTIMATE_COLUMNS,
        }
    }

    /// Look up a column by (normalized) name
    pub fn column(self, name: &str) -> Option<&'static ColumnDef> {
        let key = normalize_key(name);
        self.columns().iter().find(|c| c.name == key)
    }
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
