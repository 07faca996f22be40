//! Property ETL - spreadsheet-driven normalization of property records
//!
//! Loads semi-structured property records (JSON) into a normalized
//! relational schema. A field-mapping spreadsheet decides which table and
//! column each source field belongs to; anything it does not cover lands in
//! the sparse `property_attribute` table.
//!
//! ## Flow
//!
//! ```text
//! mapping file -> MappingTable (once, immutable)
//! records file -> RecordNormalizer -> FieldResolver (per field)
//!              -> NormalizedRecord -> RecordSink (one transaction per record)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use property_etl::{parse_csv, MemorySink, Pipeline};
//! use serde_json::json;
//! use std::path::Path;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mapping = parse_csv(
//!     "raw_field,target_table,target_column\nid,property,external_id\n".as_bytes(),
//!     b',',
//!     Path::new("fields.csv"),
//! )?;
//! let mut pipeline = Pipeline::new(&mapping, MemorySink::new());
//! let report = pipeline.run(&[json!({"id": "P100", "pool": true})]).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod input;
pub mod mapping;
pub mod normalizer;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod sink;
pub mod value;

// Database integration (when enabled)
#[cfg(feature = "database")]
pub mod database;

pub use config::{load_env, mask_database_url, DatabaseConfig};
pub use error::{CoercionError, ConfigError, EtlError, InputError, WriteError};
pub use input::{parse_records, read_records};
pub use mapping::{
    load_mapping, normalize_key, parse_csv, parse_workbook, parse_yaml, FieldTarget, MappingTable,
    MatchKind, TargetTable, ValueType, DEFAULT_FUZZY_THRESHOLD,
};
pub use normalizer::{AttributeRow, NormalizedRecord, RecordNormalizer, TableRow};
pub use pipeline::{Pipeline, RecordFailure, RecordOutcome, RecordStage, RunReport};
pub use resolver::{FieldResolver, RoutedField};
pub use sink::{check_constraints, MemorySink, PropertyId, RecordSink};
pub use value::FieldValue;

#[cfg(feature = "database")]
pub use database::{DatabaseManager, PropertyRepository};
