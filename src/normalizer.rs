//! Record normalizer
//!
//! Walks one source record, resolves every leaf field and groups the results
//! into one `property` row, at most one row per detail table and any number
//! of `property_attribute` rows.
//!
//! Nested objects are flattened with their parent keys as a dotted path.
//! An object whose own path maps to a JSON column (the rehab
//! `estimate_breakdown`) is packed whole into that column, and scalar
//! sub-fields mapped to such a column are merged into the same blob keyed by
//! their leaf name.
//!
//! When two fields land on the same column, an exact mapping match beats a
//! fuzzy one and otherwise the field that comes first in the record wins.
//! The other value is kept as an attribute, never dropped.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::error::WriteError;
use crate::mapping::{FieldTarget, MappingTable, MatchKind, TargetTable};
use crate::resolver::{FieldResolver, RoutedField};
use crate::schema::EXTERNAL_ID_COLUMN;
use crate::value::FieldValue;

/// Column values for one row, ordered by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    columns: BTreeMap<&'static str, FieldValue>,
}

impl TableRow {
    /// Set a column unless it already has a value
    fn set_if_absent(&mut self, column: &'static str, value: FieldValue) -> bool {
        if self.columns.contains_key(column) {
            return false;
        }
        self.columns.insert(column, value);
        true
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.columns.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A `property_attribute` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub key: String,
    pub value: Option<String>,
}

/// All rows produced from one source record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    pub property: TableRow,
    pub details: BTreeMap<TargetTable, TableRow>,
    pub attributes: Vec<AttributeRow>,
    /// Fields that were mapped but failed coercion
    pub demoted: usize,
}

impl NormalizedRecord {
    pub fn external_id(&self) -> Option<&str> {
        self.property
            .get(EXTERNAL_ID_COLUMN)
            .and_then(FieldValue::as_text)
    }

    /// External id, or the validation failure that stops this record
    pub fn require_external_id(&self) -> Result<&str, WriteError> {
        self.external_id().ok_or(WriteError::MissingExternalId)
    }

    pub fn detail(&self, table: TargetTable) -> Option<&TableRow> {
        self.details.get(&table)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeRow> {
        self.attributes.iter().find(|a| a.key == key)
    }
}

/// A column value together with the field that supplied it
struct Claim {
    key: String,
    value: FieldValue,
    kind: MatchKind,
}

#[derive(Default)]
struct Accumulator {
    claims: BTreeMap<(TargetTable, &'static str), Claim>,
    blobs: BTreeMap<(TargetTable, &'static str), JsonValue>,
    attributes: BTreeMap<String, Option<String>>,
    demoted: usize,
}

impl Accumulator {
    fn push(&mut self, routed: RoutedField) {
        match routed {
            RoutedField::Mapped {
                key,
                table,
                column,
                value: Some(value),
                kind,
            } => self.claim(table, column, Claim { key, value, kind }),
            RoutedField::Mapped { value: None, .. } => {}
            RoutedField::Unmapped { key, raw, demoted } => {
                if demoted.is_some() {
                    self.demoted += 1;
                }
                self.attributes.entry(key).or_insert(raw);
            }
        }
    }

    /// Assign a column. An exact match displaces a fuzzy one; otherwise the
    /// earlier field keeps the column. The losing value is kept as an
    /// attribute under its own key.
    fn claim(&mut self, table: TargetTable, column: &'static str, incoming: Claim) {
        let loser = match self.claims.entry((table, column)) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
                return;
            }
            Entry::Occupied(mut slot) => {
                if incoming.kind > slot.get().kind {
                    slot.insert(incoming)
                } else {
                    incoming
                }
            }
        };

        warn!(
            table = %table,
            column,
            field = loser.key.as_str(),
            "column already claimed by another field, storing as attribute"
        );
        self.attributes
            .entry(loser.key)
            .or_insert_with(|| Some(loser.value.to_string()));
    }

    /// Add to a JSON blob column. `leaf` is `Some` for a scalar sub-field
    /// merged under its own key, `None` for a whole value.
    fn add_blob(&mut self, target: &FieldTarget, leaf: Option<&str>, value: &JsonValue) {
        let slot = self
            .blobs
            .entry((target.table, target.column))
            .or_insert(JsonValue::Null);

        match leaf {
            Some(leaf) => {
                if !slot.is_object() {
                    *slot = JsonValue::Object(Map::new());
                }
                if let JsonValue::Object(map) = slot {
                    map.insert(leaf.to_string(), value.clone());
                }
            }
            None => {
                let whole = match FieldValue::coerce(value, target.value_type) {
                    Ok(Some(FieldValue::Json(v))) => v,
                    _ => value.clone(),
                };
                match (slot, whole) {
                    (JsonValue::Object(existing), JsonValue::Object(incoming)) => {
                        existing.extend(incoming);
                    }
                    (slot, whole) => *slot = whole,
                }
            }
        }
    }

    fn finish(self) -> NormalizedRecord {
        let mut rows: BTreeMap<TargetTable, TableRow> = BTreeMap::new();
        for ((table, column), claim) in self.claims {
            rows.entry(table).or_default().set_if_absent(column, claim.value);
        }
        for ((table, column), blob) in self.blobs {
            if blob.is_null() {
                continue;
            }
            rows.entry(table)
                .or_default()
                .set_if_absent(column, FieldValue::Json(blob));
        }

        let property = rows.remove(&TargetTable::Property).unwrap_or_default();
        let details = rows
            .into_iter()
            .filter(|(_, row)| !row.is_empty())
            .collect();
        let attributes = self
            .attributes
            .into_iter()
            .map(|(key, value)| AttributeRow { key, value })
            .collect();

        NormalizedRecord {
            property,
            details,
            attributes,
            demoted: self.demoted,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordNormalizer<'a> {
    resolver: FieldResolver<'a>,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(mapping: &'a MappingTable) -> Self {
        Self {
            resolver: FieldResolver::new(mapping),
        }
    }

    pub fn resolver(&self) -> &FieldResolver<'a> {
        &self.resolver
    }

    /// Normalize one source record. Fails only if the record is not a JSON
    /// object; field-level problems are absorbed into attributes.
    pub fn normalize(&self, record: &JsonValue) -> Result<NormalizedRecord, WriteError> {
        let JsonValue::Object(fields) = record else {
            return Err(WriteError::InvalidRecord {
                reason: format!("expected a JSON object, found {}", json_kind(record)),
            });
        };

        let mut acc = Accumulator::default();
        let mut path = Vec::new();
        for (key, value) in fields {
            path.push(key.clone());
            self.walk(&mut path, value, &mut acc);
            path.pop();
        }
        Ok(acc.finish())
    }

    fn walk(&self, path: &mut Vec<String>, value: &JsonValue, acc: &mut Accumulator) {
        let matched = self.resolver.match_for_path(path);

        if let Some((target, _)) = matched.filter(|(t, _)| t.is_blob()) {
            let leaf = if path.len() > 1 && !value.is_object() {
                path.last().map(String::as_str)
            } else {
                None
            };
            acc.add_blob(target, leaf, value);
            return;
        }

        match value {
            JsonValue::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    path.push(key.clone());
                    self.walk(path, child, acc);
                    path.pop();
                }
            }
            _ => {
                let key = path.join(".");
                acc.push(self.resolver.route(&key, matched, value));
            }
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
