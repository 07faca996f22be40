//! Source records file
//!
//! Accepts either a single JSON array of records or JSON Lines (one record
//! per line).

use std::path::Path;

use serde_json::{Deserializer, Value as JsonValue};

use crate::error::InputError;

/// Read every record from `path`
pub fn read_records(path: &Path) -> Result<Vec<JsonValue>, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(&content, path)
}

/// Parse records from an already-loaded file
pub fn parse_records(content: &str, path: &Path) -> Result<Vec<JsonValue>, InputError> {
    let mut values = Vec::new();
    for value in Deserializer::from_str(content).into_iter::<JsonValue>() {
        let value = value.map_err(|source| InputError::Json {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        })?;
        values.push(value);
    }

    match values.len() {
        1 => match values.pop() {
            Some(JsonValue::Array(records)) => Ok(records),
            Some(record @ JsonValue::Object(_)) => Ok(vec![record]),
            Some(other) => Err(InputError::Shape {
                path: path.to_path_buf(),
                found: other.to_string().chars().take(40).collect(),
            }),
            None => Ok(Vec::new()),
        },
        _ => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(content: &str) -> Result<Vec<JsonValue>, InputError> {
        parse_records(content, Path::new("properties.json"))
    }

    #[test]
    fn json_array() {
        let records = parse(r#"[{"id": "P1"}, {"id": "P2"}]"#).unwrap();
        assert_eq!(records, vec![json!({"id": "P1"}), json!({"id": "P2"})]);
    }

    #[test]
    fn json_lines() {
        let records = parse("{\"id\": \"P1\"}\n{\"id\": \"P2\"}\n\n{\"id\": \"P3\"}\n").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], json!({"id": "P3"}));
    }

    #[test]
    fn single_object_is_one_record() {
        assert_eq!(parse(r#"{"id": "P1"}"#).unwrap().len(), 1);
    }

    #[test]
    fn empty_file_has_no_records() {
        assert!(parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn invalid_json_reports_line() {
        match parse("{\"id\": \"P1\"}\n{\"id\": }\n") {
            Err(InputError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected JSON error, got {other:?}"),
        }
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(matches!(parse("42"), Err(InputError::Shape { .. })));
    }
}
