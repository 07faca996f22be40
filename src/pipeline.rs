//! Record-by-record load pipeline
//!
//! Records are processed strictly one at a time:
//!
//! ```text
//! received -> resolved -> grouped -> written
//!     |           |           \-> failed   sink rejected the rows
//!     |           \-> failed               no external id
//!     \-> failed                           not a JSON object
//! ```
//!
//! Only the sink can fail a record that reached `grouped`; the two earlier
//! edges reject records before any row exists, so there is nothing to roll
//! back. A failure records the last stage the record reached, is reported
//! with its index and external id, and the run moves on to the next record.
//! Nothing from a failed record is left in the sink.

use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

use crate::mapping::MappingTable;
use crate::normalizer::RecordNormalizer;
use crate::sink::{PropertyId, RecordSink};

/// Log progress every this many records
const PROGRESS_INTERVAL: usize = 1000;

/// Lifecycle of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    Received,
    /// Every field routed to a column or an attribute
    Resolved,
    /// Rows grouped per table and keyed by external id
    Grouped,
    Written,
    Failed,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Resolved => "resolved",
            Self::Grouped => "grouped",
            Self::Written => "written",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A record that could not be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    /// Zero-based position in the input file
    pub index: usize,
    pub external_id: Option<String>,
    /// Last stage the record reached before failing
    pub stage: RecordStage,
    pub reason: String,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record #{} ({}) failed after {}: {}",
            self.index,
            self.external_id.as_deref().unwrap_or("no external id"),
            self.stage,
            self.reason
        )
    }
}

/// Summary of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub written: usize,
    pub failed: Vec<RecordFailure>,
    /// Fields demoted to attributes because their value failed coercion
    pub demoted_fields: usize,
    pub attribute_rows: usize,
}

impl RunReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives normalization and writing for a sequence of records
pub struct Pipeline<'a, S> {
    normalizer: RecordNormalizer<'a>,
    sink: S,
}

impl<'a, S: RecordSink> Pipeline<'a, S> {
    pub fn new(mapping: &'a MappingTable, sink: S) -> Self {
        Self {
            normalizer: RecordNormalizer::new(mapping),
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Process every record in order and summarise the outcome
    pub async fn run<'r, I>(&mut self, records: I) -> RunReport
    where
        I: IntoIterator<Item = &'r JsonValue>,
    {
        let mut report = RunReport::default();

        for (index, record) in records.into_iter().enumerate() {
            report.total += 1;
            match self.process_record(index, record).await {
                Ok(outcome) => {
                    report.written += 1;
                    report.demoted_fields += outcome.demoted;
                    report.attribute_rows += outcome.attributes;
                }
                Err(failure) => {
                    error!("{}", failure);
                    report.failed.push(failure);
                }
            }

            if report.total % PROGRESS_INTERVAL == 0 {
                info!(
                    "Processed {} records ({} written, {} failed)",
                    report.total,
                    report.written,
                    report.failed_count()
                );
            }
        }

        info!(
            "Completed: {} written, {} failed, {} field(s) demoted",
            report.written,
            report.failed_count(),
            report.demoted_fields
        );
        report
    }

    /// Normalize and write one record
    pub async fn process_record(
        &mut self,
        index: usize,
        record: &JsonValue,
    ) -> Result<RecordOutcome, RecordFailure> {
        let fail = |stage: RecordStage, external_id: Option<&str>, reason: String| RecordFailure {
            index,
            external_id: external_id.map(str::to_string),
            stage,
            reason,
        };

        let normalized = self
            .normalizer
            .normalize(record)
            .map_err(|e| fail(RecordStage::Received, None, e.to_string()))?;
        debug!(index, stage = %RecordStage::Resolved, "record resolved");

        let external_id = normalized
            .require_external_id()
            .map_err(|e| fail(RecordStage::Resolved, None, e.to_string()))?;
        debug!(index, external_id, stage = %RecordStage::Grouped, "record grouped");

        let property_id = self
            .sink
            .write_record(&normalized)
            .await
            .map_err(|e| fail(RecordStage::Grouped, Some(external_id), e.to_string()))?;
        debug!(index, external_id, property_id, stage = %RecordStage::Written, "record written");

        Ok(RecordOutcome {
            property_id,
            demoted: normalized.demoted,
            attributes: normalized.attributes.len(),
        })
    }
}

/// Result of writing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub property_id: PropertyId,
    pub demoted: usize,
    pub attributes: usize,
}
