//! Parsing of the `tags` request parameter shared by form and record labels.

use serde_json::Value;

use crate::error::AppError;

pub const MAX_TAG_LEN: usize = 100;

/// Accepts `"a, b"` or `["a", "b"]`. Entries are trimmed, empties dropped
/// and duplicates collapsed; order of first appearance is kept.
pub fn parse(value: Option<&Value>) -> Result<Vec<String>, AppError> {
    let raw: Vec<&str> = match value {
        Some(Value::String(s)) => s.split(',').collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| AppError::BadRequest("Tags must be strings".to_string()))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(AppError::BadRequest(
                "'tags' must be a string or a list of strings".to_string(),
            ));
        }
        None => return Err(AppError::BadRequest("'tags' is required".to_string())),
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in raw.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(AppError::BadRequest(format!(
                "Tags may be at most {MAX_TAG_LEN} characters"
            )));
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    if tags.is_empty() {
        return Err(AppError::BadRequest("No tags provided".to_string()));
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comma_separated_string() {
        assert_eq!(
            parse(Some(&json!("hello, world ,hello,"))).unwrap(),
            vec!["hello".to_string(), "world".to_string()]
        );
    }

    #[test]
    fn list_of_strings() {
        assert_eq!(
            parse(Some(&json!(["b", " a "]))).unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(matches!(parse(Some(&json!(" , "))), Err(AppError::BadRequest(_))));
        assert!(matches!(parse(Some(&json!(5))), Err(AppError::BadRequest(_))));
        assert!(matches!(parse(Some(&json!([1]))), Err(AppError::BadRequest(_))));
        assert!(matches!(parse(None), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn rejects_overlong_tags() {
        let long = "x".repeat(MAX_TAG_LEN + 1);
        assert!(parse(Some(&json!(long))).is_err());
    }
}
