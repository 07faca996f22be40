//! Field mapping table
//!
//! The mapping spreadsheet is loaded once into an immutable lookup from
//! normalized source-field name to a [`FieldTarget`]. Everything absent from
//! the table is unmapped and ends up in `property_attribute`.

mod loader;

use std::collections::{HashMap, HashSet};

use tracing::debug;

pub use loader::{load_mapping, parse_csv, parse_workbook, parse_yaml, MappingRow};

pub use crate::schema::{TargetTable, ValueType};

/// Jaro-Winkler similarity a near-miss key must reach to count as a match
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.94;

/// Shortest normalized key considered for fuzzy matching
const FUZZY_MIN_LEN: usize = 5;

/// Normalize a field name for lookup.
///
/// Trims, splits camelCase, case-folds and collapses every run of
/// separators (space, `.`, `-`, `/`, `_`, ...) into one `_`:
/// `"HOA Fee-Amount"`, `"hoa.fee_amount"` and `"hoaFeeAmount"` all become
/// `"hoa_fee_amount"`.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev: Option<char> = None;
    let mut pending_sep = false;

    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            let camel_break = c.is_uppercase()
                && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            if (pending_sep || camel_break) && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
        prev = Some(c);
    }
    out
}

/// Where a mapped field goes
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTarget {
    /// Source field name as written in the spreadsheet
    pub source_field: String,
    pub table: TargetTable,
    pub column: &'static str,
    pub value_type: ValueType,
}

impl FieldTarget {
    /// Blob targets collect a whole sub-object (or several sub-fields) into a
    /// single JSON value instead of one column per field
    pub fn is_blob(&self) -> bool {
        self.value_type == ValueType::Json
    }
}

/// How a source field name matched a mapping entry. Orders by strength,
/// so an exact match outranks a fuzzy one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Fuzzy,
    Exact,
}

/// Immutable lookup from normalized source-field name to target
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: HashMap<String, FieldTarget>,
    /// Fields the spreadsheet explicitly routes to `property_attribute`
    pinned_unmapped: HashSet<String>,
    fuzzy_threshold: Option<f64>,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            pinned_unmapped: HashSet::new(),
            fuzzy_threshold: Some(DEFAULT_FUZZY_THRESHOLD),
        }
    }
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fuzzy-match threshold; `None` (or a value `<= 0`) disables
    /// fuzzy matching
    pub fn with_fuzzy_threshold(mut self, threshold: Option<f64>) -> Self {
        self.fuzzy_threshold = threshold.filter(|t| *t > 0.0);
        self
    }

    /// Add an entry. The first entry for a normalized key wins; returns
    /// `false` when the key was already present.
    pub fn insert(&mut self, target: FieldTarget) -> bool {
        let key = normalize_key(&target.source_field);
        if key.is_empty() || self.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, target);
        true
    }

    /// Route a field to `property_attribute` even if it would fuzzy-match
    pub fn pin_unmapped(&mut self, source_field: &str) -> bool {
        let key = normalize_key(source_field);
        if key.is_empty() || self.contains_key(&key) {
            return false;
        }
        self.pinned_unmapped.insert(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key) || self.pinned_unmapped.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FieldTarget> {
        self.entries.values()
    }

    /// Find the target for a source field name
    pub fn lookup(&self, field: &str) -> Option<&FieldTarget> {
        self.lookup_match(field).map(|(target, _)| target)
    }

    /// Find the target for a source field name and report how it matched
    pub fn lookup_match(&self, field: &str) -> Option<(&FieldTarget, MatchKind)> {
        let key = normalize_key(field);
        if key.is_empty() || self.pinned_unmapped.contains(&key) {
            return None;
        }
        if let Some(target) = self.entries.get(&key) {
            return Some((target, MatchKind::Exact));
        }
        self.fuzzy_lookup(&key).map(|target| (target, MatchKind::Fuzzy))
    }

    /// Best Jaro-Winkler match above the threshold. Ties are ambiguous and
    /// resolve to nothing.
    fn fuzzy_lookup(&self, key: &str) -> Option<&FieldTarget> {
        let threshold = self.fuzzy_threshold?;
        if key.len() < FUZZY_MIN_LEN {
            return None;
        }

        let mut best: Option<(f64, &str, &FieldTarget)> = None;
        let mut tied = false;
        for (candidate, target) in &self.entries {
            if candidate.len() < FUZZY_MIN_LEN {
                continue;
            }
            let score = strsim::jaro_winkler(key, candidate);
            if score < threshold {
                continue;
            }
            match best {
                Some((best_score, _, _)) if (score - best_score).abs() < f64::EPSILON => {
                    tied = true;
                }
                Some((best_score, _, _)) if score < best_score => {}
                _ => {
                    best = Some((score, candidate.as_str(), target));
                    tied = false;
                }
            }
        }

        if tied {
            debug!(field = key, "ambiguous fuzzy match, treating as unmapped");
            return None;
        }
        best.map(|(score, candidate, target)| {
            debug!(field = key, matched = candidate, score, "fuzzy mapping match");
            target
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(source: &str, table: TargetTable, column: &'static str, ty: ValueType) -> FieldTarget {
        FieldTarget {
            source_field: source.to_string(),
            table,
            column,
            value_type: ty,
        }
    }

    fn sample() -> MappingTable {
        let mut table = MappingTable::new();
        table.insert(target("Bedrooms", TargetTable::PropertyDetail, "bedrooms", ValueType::Int));
        table.insert(target("year_built", TargetTable::PropertyDetail, "year_built", ValueType::Int));
        table.insert(target("valuation_amount", TargetTable::Valuation, "valuation_amount", ValueType::Decimal));
        table.insert(target("valuation_source", TargetTable::Valuation, "valuation_source", ValueType::String));
        table
    }

    #[test]
    fn normalize_collapses_separators_and_case() {
        assert_eq!(normalize_key("  HOA Fee-Amount "), "hoa_fee_amount");
        assert_eq!(normalize_key("hoa.fee__amount"), "hoa_fee_amount");
        assert_eq!(normalize_key("hoaFeeAmount"), "hoa_fee_amount");
        assert_eq!(normalize_key("address_line1"), "address_line1");
        assert_eq!(normalize_key("addressLine1"), "address_line1");
        assert_eq!(normalize_key("__id__"), "id");
        assert_eq!(normalize_key("HOA"), "hoa");
        assert_eq!(normalize_key(" . "), "");
    }

    #[test]
    fn exact_lookup_after_normalization() {
        let table = sample();
        assert_eq!(table.lookup(" BEDROOMS").map(|t| t.column), Some("bedrooms"));
        assert_eq!(table.lookup("yearBuilt").map(|t| t.column), Some("year_built"));
        assert!(table.lookup("zz_unknown_field").is_none());
    }

    #[test]
    fn first_entry_wins() {
        let mut table = sample();
        assert!(!table.insert(target("bedrooms", TargetTable::Property, "city", ValueType::String)));
        assert_eq!(table.lookup("bedrooms").map(|t| t.table), Some(TargetTable::PropertyDetail));
    }

    #[test]
    fn fuzzy_tolerates_small_drift() {
        let table = sample();
        assert_eq!(table.lookup("bedroom").map(|t| t.column), Some("bedrooms"));
        assert_eq!(table.lookup("year_bulit").map(|t| t.column), Some("year_built"));
    }

    #[test]
    fn lookup_reports_match_kind() {
        let table = sample();
        let kind = |field: &str| table.lookup_match(field).map(|(_, kind)| kind);
        assert_eq!(kind("Bedrooms"), Some(MatchKind::Exact));
        assert_eq!(kind("bedroom"), Some(MatchKind::Fuzzy));
        assert_eq!(kind("zz_unknown_field"), None);
        assert!(MatchKind::Exact > MatchKind::Fuzzy);
    }

    #[test]
    fn fuzzy_can_be_disabled() {
        let table = sample().with_fuzzy_threshold(None);
        assert!(table.lookup("bedroom").is_none());
        let table = sample().with_fuzzy_threshold(Some(0.0));
        assert!(table.lookup("bedroom").is_none());
    }

    #[test]
    fn fuzzy_ignores_short_keys() {
        let mut table = MappingTable::new();
        table.insert(target("city", TargetTable::Property, "city", ValueType::String));
        assert!(table.lookup("citi").is_none());
    }

    #[test]
    fn pinned_fields_stay_unmapped() {
        let mut table = sample();
        assert!(table.pin_unmapped("bedroom"));
        assert!(table.lookup("bedroom").is_none());
        assert!(table.lookup("bedrooms").is_some());
    }

    #[test]
    fn ambiguous_fuzzy_match_is_unmapped() {
        let mut table = MappingTable::new();
        table.insert(target("fee_tier_a", TargetTable::Hoa, "hoa_name", ValueType::String));
        table.insert(target("fee_tier_b", TargetTable::Hoa, "hoa_fee_frequency", ValueType::String));
        assert!(table.lookup("fee_tier_c").is_none());
        assert_eq!(table.lookup("fee_tier_a").map(|t| t.column), Some("hoa_name"));
    }
}
