//! Mapping spreadsheet loader
//!
//! Reads the field-mapping spreadsheet (`.xlsx`/`.xls`/`.ods` workbook, or
//! the sheet exported as CSV or TSV) or an equivalent YAML list into a
//! [`MappingTable`]. Workbooks are read from their first worksheet.
//!
//! # Sheet layout
//!
//! ```text
//! raw_field,target_table,target_column,type
//! Bedrooms,property_detail,bedrooms,int
//! HOA Fee,hoa,hoa_fee_amount,decimal
//! rehab,rehab_estimate,estimate_breakdown,json
//! ```
//!
//! Header names are matched loosely (`Target Table` == `target_table`) and
//! the type column is optional.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{normalize_key, FieldTarget, MappingTable};
use crate::error::ConfigError;
use crate::schema::{TargetTable, ValueType, ATTRIBUTE_TABLE};

const SOURCE_HEADERS: &[&str] = &[
    "source_field",
    "raw_field",
    "field",
    "source",
    "field_name",
    "source_field_name",
];
const TABLE_HEADERS: &[&str] = &["target_table", "table"];
const COLUMN_HEADERS: &[&str] = &["target_column", "column"];
const TYPE_HEADERS: &[&str] = &["value_type", "type", "data_type", "type_hint"];

/// One row of the mapping spreadsheet
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MappingRow {
    #[serde(alias = "raw_field", alias = "field", alias = "source")]
    pub source_field: String,
    #[serde(alias = "table")]
    pub target_table: String,
    #[serde(alias = "column")]
    pub target_column: String,
    #[serde(default, alias = "type", alias = "data_type", alias = "type_hint")]
    pub value_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YamlMapping {
    List(Vec<MappingRow>),
    Document { fields: Vec<MappingRow> },
}

/// Load the mapping file, choosing the parser from the file extension
pub fn load_mapping(path: &Path) -> Result<MappingTable, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" | "tsv" | "tab" | "txt" => {
            let delimiter = if extension == "csv" { b',' } else { b'\t' };
            let file = std::fs::File::open(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_csv(file, delimiter, path)?
        }
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => parse_workbook(path)?,
        "yaml" | "yml" => {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_yaml(&content, path)?
        }
        _ => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
        }
    };

    info!(
        "Loaded {} field mapping(s) from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

/// Parse a delimited mapping spreadsheet
pub fn parse_csv<R: Read>(
    reader: R,
    delimiter: u8,
    path: &Path,
) -> Result<MappingTable, ConfigError> {
    let parse_err = |e: csv::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(parse_err)?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        rows.push((line, record.iter().map(str::to_string).collect()));
    }

    parse_sheet(&headers, rows, path)
}

/// Parse the first worksheet of a spreadsheet workbook
pub fn parse_workbook(path: &Path) -> Result<MappingTable, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut workbook = open_workbook_auto(path).map_err(|e| parse_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| parse_err("workbook has no worksheets".to_string()))?
        .map_err(|e| parse_err(e.to_string()))?;

    // Leading blank rows are skipped; the first non-empty row is the header
    let first_row = range.start().map(|(row, _)| row as u64 + 1).unwrap_or(1);
    let mut rows = range
        .rows()
        .enumerate()
        .map(|(i, cells)| (first_row + i as u64, cells.iter().map(cell_text).collect::<Vec<_>>()))
        .skip_while(|(_, cells)| cells.iter().all(|c| c.trim().is_empty()));

    let Some((_, headers)) = rows.next() else {
        return Err(ConfigError::MissingColumns {
            path: path.to_path_buf(),
            missing: vec![
                SOURCE_HEADERS[0].to_string(),
                TABLE_HEADERS[0].to_string(),
                COLUMN_HEADERS[0].to_string(),
            ],
        });
    };

    parse_sheet(&headers, rows.collect(), path)
}

/// Spreadsheet cell as text. Whole-number floats lose their `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Build a table from a header row and data rows of any sheet source
fn parse_sheet(
    headers: &[String],
    records: Vec<(u64, Vec<String>)>,
    path: &Path,
) -> Result<MappingTable, ConfigError> {
    let headers: Vec<String> = headers.iter().map(|h| normalize_key(h)).collect();
    let find = |aliases: &[&str]| {
        aliases
            .iter()
            .find_map(|alias| headers.iter().position(|h| h == alias))
    };

    let source_idx = find(SOURCE_HEADERS);
    let table_idx = find(TABLE_HEADERS);
    let column_idx = find(COLUMN_HEADERS);
    let type_idx = find(TYPE_HEADERS);

    let (source_idx, table_idx, column_idx) = match (source_idx, table_idx, column_idx) {
        (Some(s), Some(t), Some(c)) => (s, t, c),
        _ => {
            let missing = [
                (source_idx, SOURCE_HEADERS[0]),
                (table_idx, TABLE_HEADERS[0]),
                (column_idx, COLUMN_HEADERS[0]),
            ]
            .iter()
            .filter(|(idx, _)| idx.is_none())
            .map(|(_, name)| name.to_string())
            .collect();
            return Err(ConfigError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }
    };

    let rows = records
        .into_iter()
        .map(|(line, cells)| {
            let get = |idx: usize| cells.get(idx).map(|c| c.trim().to_string()).unwrap_or_default();
            (
                line,
                MappingRow {
                    source_field: get(source_idx),
                    target_table: get(table_idx),
                    target_column: get(column_idx),
                    value_type: type_idx.map(get).filter(|t| !t.is_empty()),
                },
            )
        })
        .collect();

    Ok(build_table(rows))
}

/// Parse a YAML mapping: either a bare list of rows or `{ fields: [...] }`
pub fn parse_yaml(content: &str, path: &Path) -> Result<MappingTable, ConfigError> {
    let parsed: YamlMapping = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let rows = match parsed {
        YamlMapping::List(rows) | YamlMapping::Document { fields: rows } => rows,
    };
    Ok(build_table(
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| (i as u64 + 1, row))
            .collect(),
    ))
}

fn build_table(rows: Vec<(u64, MappingRow)>) -> MappingTable {
    let mut table = MappingTable::new();

    for (line, row) in rows {
        let source = row.source_field.trim();
        if source.is_empty() {
            debug!(line, "skipping mapping row without a source field");
            continue;
        }

        if normalize_key(&row.target_table) == ATTRIBUTE_TABLE {
            table.pin_unmapped(source);
            continue;
        }

        let Some(target_table) = TargetTable::parse(&row.target_table) else {
            warn!(
                line,
                field = source,
                table = row.target_table.as_str(),
                "unknown target table, field will be stored as an attribute"
            );
            continue;
        };

        let Some(column) = target_table.column(&row.target_column) else {
            warn!(
                line,
                field = source,
                table = %target_table,
                column = row.target_column.as_str(),
                "unknown target column, field will be stored as an attribute"
            );
            continue;
        };

        let value_type = match row.value_type.as_deref().map(str::trim) {
            None | Some("") => column.value_type,
            Some(hint) => match ValueType::from_hint(hint) {
                Some(ty) if ty.fits(column.value_type) => ty,
                Some(ty) => {
                    warn!(
                        line,
                        field = source,
                        hint = %ty,
                        column_type = %column.value_type,
                        "type hint does not fit column, using column type"
                    );
                    column.value_type
                }
                None => {
                    warn!(line, field = source, hint, "unrecognised type hint, using column type");
                    column.value_type
                }
            },
        };

        let inserted = table.insert(FieldTarget {
            source_field: source.to_string(),
            table: target_table,
            column: column.name,
            value_type,
        });
        if !inserted {
            debug!(line, field = source, "duplicate mapping row ignored, first match wins");
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv(content: &str) -> Result<MappingTable, ConfigError> {
        parse_csv(content.as_bytes(), b',', Path::new("fields.csv"))
    }

    #[test]
    fn parses_original_spreadsheet_headers() {
        let table = csv(
            "raw_field,target_table,target_column\n\
             Bedrooms,property_detail,bedrooms\n\
             hoa_fee,HOA,hoa_fee_amount\n",
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        let bedrooms = table.lookup("bedrooms").unwrap();
        assert_eq!(bedrooms.table, TargetTable::PropertyDetail);
        assert_eq!(bedrooms.value_type, ValueType::Int);
        let fee = table.lookup("HOA Fee").unwrap();
        assert_eq!(fee.column, "hoa_fee_amount");
        assert_eq!(fee.value_type, ValueType::Decimal);
    }

    #[test]
    fn header_aliases_and_type_column() {
        let table = csv(
            "Source Field , Table, Column, Data Type\n\
             bathrooms,property_detail,bathrooms,int\n\
             zip,property,postal_code,\n",
        )
        .unwrap();
        assert_eq!(table.lookup("bathrooms").unwrap().value_type, ValueType::Int);
        assert_eq!(table.lookup("zip").unwrap().value_type, ValueType::String);
    }

    #[test]
    fn missing_required_columns_is_config_error() {
        let err = csv("raw_field,target_column\nbedrooms,bedrooms\n").unwrap_err();
        match err {
            ConfigError::MissingColumns { missing, .. } => {
                assert_eq!(missing, vec!["target_table".to_string()]);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn incompatible_hint_falls_back_to_column_type() {
        let table = csv(
            "raw_field,target_table,target_column,type\n\
             bedrooms,property_detail,bedrooms,string\n\
             lat,property,latitude,geometry\n",
        )
        .unwrap();
        assert_eq!(table.lookup("bedrooms").unwrap().value_type, ValueType::Int);
        assert_eq!(table.lookup("lat").unwrap().value_type, ValueType::Decimal);
    }

    #[test]
    fn unknown_targets_and_blank_rows_are_skipped() {
        let table = csv(
            "raw_field,target_table,target_column\n\
             ,property,city\n\
             listing_agent,agent,name\n\
             garage,property_detail,garage_spaces\n\
             city,property,city\n",
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.lookup("listing_agent").is_none());
        assert!(table.lookup("garage").is_none());
    }

    #[test]
    fn duplicates_keep_first_row() {
        let table = csv(
            "raw_field,target_table,target_column\n\
             amount,valuation,valuation_amount\n\
             Amount,hoa,hoa_fee_amount\n",
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("amount").unwrap().table, TargetTable::Valuation);
    }

    #[test]
    fn attribute_table_pins_field_as_unmapped() {
        let table = csv(
            "raw_field,target_table,target_column\n\
             bedrooms,property_detail,bedrooms\n\
             bedroom,property_attribute,attr_value\n",
        )
        .unwrap();
        assert!(table.lookup("bedroom").is_none());
    }

    #[test]
    fn yaml_list_and_document() {
        let list = "- raw_field: rehab\n  table: rehab_estimate\n  column: estimate_breakdown\n";
        let table = parse_yaml(list, Path::new("fields.yaml")).unwrap();
        assert!(table.lookup("rehab").unwrap().is_blob());

        let doc = "fields:\n  - source_field: id\n    target_table: property\n    target_column: external_id\n";
        let table = parse_yaml(doc, Path::new("fields.yaml")).unwrap();
        assert_eq!(table.lookup("id").unwrap().column, "external_id");
    }

    #[test]
    fn load_mapping_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Field Config.tsv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "raw_field\ttarget_table\ttarget_column").unwrap();
        writeln!(file, "sqft\tproperty_detail\tsqft").unwrap();
        drop(file);

        let table = load_mapping(&path).unwrap();
        assert_eq!(table.lookup("sqft").unwrap().value_type, ValueType::Int);

        let docx = dir.path().join("Field Config.docx");
        assert!(matches!(
            load_mapping(&docx),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            load_mapping(&dir.path().join("missing.xlsx")),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            load_mapping(&dir.path().join("missing.csv")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn workbook_uses_same_header_aliases() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/field_config.xlsx");
        let table = load_mapping(&path).unwrap();

        assert_eq!(table.len(), 23);
        let fee = table.lookup("hoa.fee_amount").unwrap();
        assert_eq!(fee.table, TargetTable::Hoa);
        assert_eq!(fee.value_type, ValueType::Decimal);
        assert!(table.lookup("rehab").unwrap().is_blob());
        // "External ID" repeats external_id and is ignored
        assert_eq!(table.lookup("External ID").unwrap().column, "external_id");
    }

    #[test]
    fn corrupt_workbook_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Field Config.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert!(matches!(load_mapping(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn whole_number_cells_lose_fraction() {
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String(" bedrooms ".into())), " bedrooms ");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
