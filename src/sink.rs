//! Relational sink abstraction
//!
//! A [`RecordSink`] writes all rows of one normalized record as a unit: the
//! `property` row is upserted on `external_id` first, then every detail and
//! attribute row is written against the resulting `property_id`. Either all
//! of a record's rows persist or none do.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::WriteError;
use crate::mapping::TargetTable;
use crate::normalizer::{AttributeRow, NormalizedRecord, TableRow};
use crate::schema::{ATTRIBUTE_KEY_MAX, ATTRIBUTE_TABLE};
use crate::value::FieldValue;

/// Generated primary key of a `property` row
pub type PropertyId = i64;

#[async_trait]
pub trait RecordSink: Send {
    /// Write one record atomically and return its `property_id`
    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<PropertyId, WriteError>;
}

/// Validate a record against the schema before any row is written.
///
/// Returns the record's external id.
pub fn check_constraints(record: &NormalizedRecord) -> Result<&str, WriteError> {
    let external_id = record.require_external_id()?;

    check_row(TargetTable::Property, &record.property)?;
    for (table, row) in &record.details {
        check_row(*table, row)?;
    }
    // An empty key is legal; attr_key is only NOT NULL and VARCHAR(200)
    for attr in &record.attributes {
        let len = attr.key.chars().count();
        if len > ATTRIBUTE_KEY_MAX {
            return Err(WriteError::Constraint {
                table: ATTRIBUTE_TABLE.to_string(),
                column: "attr_key".to_string(),
                reason: format!("key of {} characters exceeds VARCHAR({})", len, ATTRIBUTE_KEY_MAX),
            });
        }
    }
    Ok(external_id)
}

fn check_row(table: TargetTable, row: &TableRow) -> Result<(), WriteError> {
    for (column, value) in row.columns() {
        let constraint = |reason: String| WriteError::Constraint {
            table: table.to_string(),
            column: column.to_string(),
            reason,
        };
        let def = table
            .column(column)
            .ok_or_else(|| constraint("unknown column".to_string()))?;
        def.check(value).map_err(constraint)?;
    }
    Ok(())
}

/// Stored column values of one row
pub type StoredRow = BTreeMap<&'static str, FieldValue>;

/// In-memory sink with the same upsert semantics and constraints as the
/// PostgreSQL schema. Backs dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    last_id: PropertyId,
    ids: HashMap<String, PropertyId>,
    properties: BTreeMap<PropertyId, StoredRow>,
    details: BTreeMap<(TargetTable, PropertyId), StoredRow>,
    attributes: BTreeMap<(PropertyId, String), Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn property_id(&self, external_id: &str) -> Option<PropertyId> {
        self.ids.get(external_id).copied()
    }

    pub fn property(&self, id: PropertyId) -> Option<&StoredRow> {
        self.properties.get(&id)
    }

    pub fn detail(&self, table: TargetTable, id: PropertyId) -> Option<&StoredRow> {
        self.details.get(&(table, id))
    }

    pub fn detail_count(&self, table: TargetTable) -> usize {
        self.details.keys().filter(|(t, _)| *t == table).count()
    }

    pub fn attributes(&self, id: PropertyId) -> Vec<AttributeRow> {
        self.attributes
            .range((id, String::new())..)
            .take_while(|((pid, _), _)| *pid == id)
            .map(|((_, key), value)| AttributeRow {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    fn upsert_row(target: &mut StoredRow, row: &TableRow) {
        for (column, value) in row.columns() {
            target.insert(column, value.clone());
        }
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<PropertyId, WriteError> {
        // Everything is validated up front so the apply phase cannot fail
        // half-way through a record.
        let external_id = check_constraints(record)?;

        let id = match self.ids.get(external_id) {
            Some(id) => *id,
            None => {
                self.last_id += 1;
                self.ids.insert(external_id.to_string(), self.last_id);
                self.last_id
            }
        };

        Self::upsert_row(self.properties.entry(id).or_default(), &record.property);
        for (table, row) in &record.details {
            Self::upsert_row(self.details.entry((*table, id)).or_default(), row);
        }
        for attr in &record.attributes {
            self.attributes
                .insert((id, attr.key.clone()), attr.value.clone());
        }
        Ok(id)
    }
}
