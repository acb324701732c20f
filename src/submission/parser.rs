use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// A file part of a multipart submission.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub mimetype: String,
    pub content: bytes::Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedBody {
    pub answers: Map<String, Value>,
    pub uploads: Vec<Upload>,
}

/// Parse a request body based on Content-Type header.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, String> {
    let ct = content_type.unwrap_or("application/json");

    if ct.contains("application/json") {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {e}"))
    } else if ct.contains("application/x-www-form-urlencoded") {
        Ok(Value::Object(parse_form_urlencoded(body)?))
    } else if ct.contains("multipart/form-data") {
        Err("multipart".to_string())
    } else {
        // Try JSON first, then form-urlencoded
        serde_json::from_slice(body)
            .or_else(|_| parse_form_urlencoded(body).map(Value::Object))
            .map_err(|e| format!("Unable to parse body: {e}"))
    }
}

/// Parse a submission body into flattened answers. Nested JSON groups become
/// slash separated question paths (`{"meta": {"instanceID": ..}}` is
/// `meta/instanceID`).
pub fn parse_answers(content_type: Option<&str>, body: &[u8]) -> Result<ParsedBody, String> {
    match parse_body(content_type, body)? {
        Value::Object(obj) => {
            let mut answers = Map::new();
            flatten("", obj, &mut answers);
            Ok(ParsedBody {
                answers,
                uploads: Vec::new(),
            })
        }
        _ => Err("Submission must be a JSON object".to_string()),
    }
}

fn flatten(prefix: &str, obj: Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}/{key}")
        };
        match value {
            Value::Object(inner) => flatten(&path, inner, out),
            other => {
                out.insert(path, other);
            }
        }
    }
}

/// Repeated keys (select_multiple answers) are joined with spaces.
fn parse_form_urlencoded(body: &[u8]) -> Result<Map<String, Value>, String> {
    let body_str = std::str::from_utf8(body).map_err(|e| format!("Invalid UTF-8: {e}"))?;

    let mut map = Map::new();
    for (k, v) in form_urlencoded::parse(body_str.as_bytes()) {
        match map.get_mut(&*k) {
            Some(Value::String(existing)) => {
                existing.push(' ');
                existing.push_str(&v);
            }
            _ => {
                map.insert(k.into_owned(), Value::String(v.into_owned()));
            }
        }
    }
    Ok(map)
}

/// Parse multipart form data using multer. Parts with a filename become
/// uploads, the rest become answers.
pub async fn parse_multipart(headers: &HeaderMap, body: bytes::Bytes) -> Result<ParsedBody, String> {
    let boundary = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| "Missing multipart boundary".to_string())?;

    let stream = futures_util::stream::once(async { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut parsed = ParsedBody::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Multipart error: {e}"))?
    {
        let name = field.name().unwrap_or("unknown").to_string();

        if let Some(filename) = field.file_name().map(str::to_string) {
            let mimetype = field
                .content_type()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let content = field
                .bytes()
                .await
                .map_err(|e| format!("File read error: {e}"))?;
            parsed.uploads.push(Upload {
                filename,
                mimetype,
                content,
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| format!("Field read error: {e}"))?;
        parsed.answers.insert(name, Value::String(value));
    }

    Ok(parsed)
}
