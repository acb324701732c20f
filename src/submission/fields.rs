use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::models::FieldDef;

use super::geo;

pub const FIELD_TYPES: [&str; 11] = [
    "text",
    "integer",
    "decimal",
    "select_one",
    "select_multiple",
    "date",
    "datetime",
    "geopoint",
    "image",
    "note",
    "calculate",
];

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+(/[A-Za-z0-9_.\-]+)*$").unwrap());

/// Check a form's question list before publishing.
pub fn validate_definition(fields: &[FieldDef]) -> Result<(), String> {
    if fields.is_empty() {
        return Err("A form needs at least one field".to_string());
    }

    let mut seen = HashSet::new();
    for field in fields {
        if !FIELD_NAME.is_match(&field.name) {
            return Err(format!("Invalid field name: '{}'", field.name));
        }
        if field.name.starts_with('_') {
            return Err(format!(
                "Field names starting with '_' are reserved: '{}'",
                field.name
            ));
        }
        if !FIELD_TYPES.contains(&field.field_type.as_str()) {
            return Err(format!(
                "Unknown type '{}' for field '{}'",
                field.field_type, field.name
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(format!("Duplicate field name: '{}'", field.name));
        }
    }
    Ok(())
}

/// Compare answers against the form's questions. Returns warnings; a
/// submission is never rejected for its content.
pub fn validate_answers(answers: &Map<String, Value>, fields: &[FieldDef]) -> Vec<String> {
    let mut warnings = Vec::new();

    for def in fields {
        let name = def.name.as_str();

        match answers.get(name) {
            None | Some(Value::Null) => {
                if def.required {
                    warnings.push(format!("Missing required field: {name}"));
                }
            }
            Some(Value::String(s)) => {
                if def.required && s.is_empty() {
                    warnings.push(format!("Required field is empty: {name}"));
                }
                if s.is_empty() {
                    continue;
                }
                match def.field_type.as_str() {
                    "integer" if s.trim().parse::<i64>().is_err() => {
                        warnings.push(format!("Invalid integer: {name}"));
                    }
                    "decimal" if s.trim().parse::<f64>().is_err() => {
                        warnings.push(format!("Invalid decimal: {name}"));
                    }
                    "date" if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() => {
                        warnings.push(format!("Invalid date format: {name}"));
                    }
                    "datetime" if chrono::DateTime::parse_from_rfc3339(s).is_err() => {
                        warnings.push(format!("Invalid datetime format: {name}"));
                    }
                    "geopoint" if geo::parse_geopoint(s).is_none() => {
                        warnings.push(format!("Invalid geopoint: {name}"));
                    }
                    _ => {}
                }
            }
            Some(Value::Bool(_)) if matches!(def.field_type.as_str(), "integer" | "decimal") => {
                warnings.push(format!("Expected number, got boolean: {name}"));
            }
            // JSON numbers are accepted natively for numeric types
            _ => {}
        }
    }

    let known: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    for key in answers.keys() {
        if !known.contains(key.as_str()) && !key.starts_with("meta/") {
            warnings.push(format!("Unknown field: {key}"));
        }
    }

    warnings
}
