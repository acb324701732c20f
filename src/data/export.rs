use std::fmt::Write;

use serde_json::{Map, Value};

const META_COLUMNS: [&str; 6] = [
    "_id",
    "_uuid",
    "_submission_time",
    "_submitted_by",
    "_status",
    "_tags",
];

/// CSV export of rendered records: answer columns in first-seen order,
/// followed by the metadata columns.
pub fn to_csv(records: &[Map<String, Value>]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !key.starts_with('_') && !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }
    columns.extend(META_COLUMNS);

    let mut csv = String::new();
    let _ = writeln!(
        csv,
        "{}",
        columns.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(",")
    );

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|col| record.get(*col).map(cell).unwrap_or_default())
            .collect();
        let _ = writeln!(csv, "{}", row.join(","));
    }

    csv
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_escape(s),
        Value::Array(items) if items.iter().all(Value::is_string) => csv_escape(
            &items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        other => csv_escape(&other.to_string()),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
