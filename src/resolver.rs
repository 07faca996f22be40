//! Field resolver: decides where one source field goes
//!
//! A field is either routed to a `(table, column)` with its value coerced
//! to the column type, or classified as unmapped and kept verbatim for
//! `property_attribute`. A value that fails coercion is demoted to unmapped
//! rather than failing the record.

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::CoercionError;
use crate::mapping::{FieldTarget, MappingTable, MatchKind, TargetTable};
use crate::value::{render_raw, FieldValue};

/// Routing decision for one field
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedField {
    Mapped {
        /// Source key as written in the record (dotted for nested fields)
        key: String,
        table: TargetTable,
        column: &'static str,
        /// `None` when the source value is null
        value: Option<FieldValue>,
        kind: MatchKind,
    },
    Unmapped {
        key: String,
        /// Stringified raw value; `None` for JSON null
        raw: Option<String>,
        /// Set when the field was mapped but its value failed coercion
        demoted: Option<CoercionError>,
    },
}

impl RoutedField {
    pub fn is_demoted(&self) -> bool {
        matches!(self, RoutedField::Unmapped { demoted: Some(_), .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldResolver<'a> {
    mapping: &'a MappingTable,
}

impl<'a> FieldResolver<'a> {
    pub fn new(mapping: &'a MappingTable) -> Self {
        Self { mapping }
    }

    /// Resolve one top-level `(field_name, value)` pair
    pub fn resolve(&self, field: &str, value: &JsonValue) -> RoutedField {
        self.route(field, self.mapping.lookup_match(field), value)
    }

    /// Resolve a nested field. The dotted path (`hoa.fee`) is looked up
    /// first, then the bare leaf key.
    pub fn resolve_path(&self, path: &[String], value: &JsonValue) -> RoutedField {
        let key = path.join(".");
        self.route(&key, self.match_for_path(path), value)
    }

    /// Mapping target for a nested path, if any
    pub fn target_for_path(&self, path: &[String]) -> Option<&'a FieldTarget> {
        self.match_for_path(path).map(|(target, _)| target)
    }

    /// Mapping target for a nested path and how it matched
    pub fn match_for_path(&self, path: &[String]) -> Option<(&'a FieldTarget, MatchKind)> {
        let mapping: &'a MappingTable = self.mapping;
        match path {
            [] => None,
            [single] => mapping.lookup_match(single),
            [.., leaf] => mapping
                .lookup_match(&path.join("."))
                .or_else(|| mapping.lookup_match(leaf)),
        }
    }

    /// Apply a lookup result to a value
    pub fn route(
        &self,
        key: &str,
        target: Option<(&FieldTarget, MatchKind)>,
        value: &JsonValue,
    ) -> RoutedField {
        let Some((target, kind)) = target else {
            debug!(field = key, "unmapped field");
            return RoutedField::Unmapped {
                key: key.to_string(),
                raw: render_raw(value),
                demoted: None,
            };
        };

        match FieldValue::coerce(value, target.value_type) {
            Ok(value) => {
                debug!(
                    field = key,
                    table = %target.table,
                    column = target.column,
                    ?kind,
                    "mapped field"
                );
                RoutedField::Mapped {
                    key: key.to_string(),
                    table: target.table,
                    column: target.column,
                    value,
                    kind,
                }
            }
            Err(err) => {
                warn!(
                    field = key,
                    table = %target.table,
                    column = target.column,
                    expected = %err.expected,
                    raw = err.raw.as_str(),
                    "value failed coercion, storing as attribute"
                );
                RoutedField::Unmapped {
                    key: key.to_string(),
                    raw: render_raw(value),
                    demoted: Some(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ValueType;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn mapping() -> MappingTable {
        let mut table = MappingTable::new();
        for (source, t, column, ty) in [
            ("bedrooms", TargetTable::PropertyDetail, "bedrooms", ValueType::Int),
            ("Bathrooms", TargetTable::PropertyDetail, "bathrooms", ValueType::Decimal),
            ("hoa.fee", TargetTable::Hoa, "hoa_fee_amount", ValueType::Decimal),
            ("hoa_name", TargetTable::Hoa, "hoa_name", ValueType::String),
            ("valuation_date", TargetTable::Valuation, "valuation_date", ValueType::Date),
        ] {
            table.insert(FieldTarget {
                source_field: source.to_string(),
                table: t,
                column,
                value_type: ty,
            });
        }
        table
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn mapped_field_is_coerced() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        assert_eq!(
            resolver.resolve("Bathrooms ", &json!("2.5")),
            RoutedField::Mapped {
                key: "Bathrooms ".into(),
                table: TargetTable::PropertyDetail,
                column: "bathrooms",
                value: Some(FieldValue::Decimal(Decimal::new(25, 1))),
                kind: MatchKind::Exact,
            }
        );
    }

    #[test]
    fn unmapped_field_keeps_original_key_and_text() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        assert_eq!(
            resolver.resolve("Pool Type", &json!({"heated": true})),
            RoutedField::Unmapped {
                key: "Pool Type".into(),
                raw: Some("{\"heated\":true}".into()),
                demoted: None,
            }
        );
    }

    #[test]
    fn coercion_failure_demotes() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        let routed = resolver.resolve("bedrooms", &json!("three"));
        assert!(routed.is_demoted());
        match routed {
            RoutedField::Unmapped { key, raw, demoted } => {
                assert_eq!(key, "bedrooms");
                assert_eq!(raw.as_deref(), Some("three"));
                assert_eq!(demoted.unwrap().expected, ValueType::Int);
            }
            other => panic!("expected demotion, got {other:?}"),
        }
    }

    #[test]
    fn null_mapped_value_routes_without_value() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        assert_eq!(
            resolver.resolve("valuation_date", &JsonValue::Null),
            RoutedField::Mapped {
                key: "valuation_date".into(),
                table: TargetTable::Valuation,
                column: "valuation_date",
                value: None,
                kind: MatchKind::Exact,
            }
        );
    }

    #[test]
    fn nested_path_prefers_dotted_key_then_leaf() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);

        let fee = resolver.target_for_path(&path(&["hoa", "fee"])).unwrap();
        assert_eq!(fee.column, "hoa_fee_amount");

        let name = resolver.target_for_path(&path(&["association", "hoa_name"])).unwrap();
        assert_eq!(name.column, "hoa_name");

        assert!(resolver.target_for_path(&path(&["meta", "source_system"])).is_none());
        assert!(resolver.target_for_path(&[]).is_none());
    }

    #[test]
    fn fuzzy_route_is_marked() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        match resolver.resolve("bedroom", &json!(2)) {
            RoutedField::Mapped { column, kind, .. } => {
                assert_eq!(column, "bedrooms");
                assert_eq!(kind, MatchKind::Fuzzy);
            }
            other => panic!("expected fuzzy mapping, got {other:?}"),
        }
    }

    #[test]
    fn nested_unmapped_key_is_dotted() {
        let mapping = mapping();
        let resolver = FieldResolver::new(&mapping);
        match resolver.resolve_path(&path(&["meta", "source_system"]), &json!("mls")) {
            RoutedField::Unmapped { key, raw, .. } => {
                assert_eq!(key, "meta.source_system");
                assert_eq!(raw.as_deref(), Some("mls"));
            }
            other => panic!("expected unmapped, got {other:?}"),
        }
    }
}
