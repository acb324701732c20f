//! Translation of the `query`, `sort`, `fields`, `start` and `limit` request
//! parameters into SQL fragments over the `instances` table (aliased `i`,
//! with the submitter joined as `u`).

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder};

pub const MAX_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    InvalidJson { param: &'static str, message: String },
    NotAnObject(&'static str),
    UnknownOperator(String),
    InvalidValue { key: String, message: String },
    InvalidSort(String),
    InvalidFields,
    NegativeOffset,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidJson { param, message } => {
                write!(f, "Invalid JSON in '{param}': {message}")
            }
            QueryError::NotAnObject(param) => write!(f, "'{param}' must be a JSON object"),
            QueryError::UnknownOperator(op) => write!(f, "Unsupported query operator: {op}"),
            QueryError::InvalidValue { key, message } => {
                write!(f, "Invalid value for '{key}': {message}")
            }
            QueryError::InvalidSort(key) => {
                write!(f, "Sort direction for '{key}' must be 1 or -1")
            }
            QueryError::InvalidFields => write!(f, "'fields' must be a JSON array of strings"),
            QueryError::NegativeOffset => write!(f, "'start' and 'limit' must not be negative"),
        }
    }
}

impl std::error::Error for QueryError {}

/// A key a condition or sort can address.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKey {
    Id,
    Uuid,
    Status,
    SubmissionTime,
    SubmittedBy,
    Tags,
    Answer(String),
}

impl FieldKey {
    pub fn parse(key: &str) -> Self {
        match key {
            "_id" => FieldKey::Id,
            "_uuid" => FieldKey::Uuid,
            "_status" => FieldKey::Status,
            "_submission_time" => FieldKey::SubmissionTime,
            "_submitted_by" => FieldKey::SubmittedBy,
            "_tags" => FieldKey::Tags,
            other => FieldKey::Answer(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            FieldKey::Id => "_id",
            FieldKey::Uuid => "_uuid",
            FieldKey::Status => "_status",
            FieldKey::SubmissionTime => "_submission_time",
            FieldKey::SubmittedBy => "_submitted_by",
            FieldKey::Tags => "_tags",
            FieldKey::Answer(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cmp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Cmp {
    fn sql(self) -> &'static str {
        match self {
            Cmp::Gt => " > ",
            Cmp::Gte => " >= ",
            Cmp::Lt => " < ",
            Cmp::Lte => " <= ",
        }
    }
}

/// A literal after normalisation for the column it is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Matches nothing, e.g. a non-numeric `_id`.
    Never,
    Null,
    Int(i64),
    Time(DateTime<Utc>),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq(Operand),
    Ne(Operand),
    In(Vec<Operand>),
    Exists(bool),
    Compare(Cmp, Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub key: FieldKey,
    pub op: Op,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub key: FieldKey,
    pub descending: bool,
}

/// Parsed form of the data listing parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataQuery {
    pub filter: Filter,
    pub sort: Vec<SortSpec>,
    pub fields: Option<Vec<String>>,
    pub start: i64,
    pub limit: Option<i64>,
}

impl DataQuery {
    pub fn parse(
        query: Option<&str>,
        sort: Option<&str>,
        fields: Option<&str>,
        start: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Self, QueryError> {
        let filter = match query.filter(|q| !q.trim().is_empty()) {
            Some(raw) => Filter::parse(&parse_json("query", raw)?)?,
            None => Filter::default(),
        };

        let sort = match sort.filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_sort(&parse_json("sort", raw)?)?,
            None => Vec::new(),
        };

        let fields = match fields.filter(|f| !f.trim().is_empty()) {
            Some(raw) => Some(parse_fields(&parse_json("fields", raw)?)?),
            None => None,
        };

        let start = start.unwrap_or(0);
        if start < 0 || limit.is_some_and(|l| l < 0) {
            return Err(QueryError::NegativeOffset);
        }

        Ok(DataQuery {
            filter,
            sort,
            fields,
            start,
            limit: limit.map(|l| l.min(MAX_LIMIT)),
        })
    }

    /// Append ORDER BY, OFFSET and LIMIT.
    pub fn push_paging(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" ORDER BY ");
        for spec in &self.sort {
            match &spec.key {
                FieldKey::Id => qb.push("i.id"),
                FieldKey::Uuid => qb.push("i.uuid"),
                FieldKey::Status => qb.push("i.status"),
                FieldKey::SubmissionTime => qb.push("i.created_at"),
                FieldKey::SubmittedBy => qb.push("u.username"),
                FieldKey::Tags => qb.push("i.tags"),
                FieldKey::Answer(path) => qb.push("i.json ->> ").push_bind(path.clone()),
            };
            qb.push(if spec.descending { " DESC, " } else { " ASC, " });
        }
        qb.push("i.id ASC");

        if self.start > 0 {
            qb.push(" OFFSET ").push_bind(self.start);
        }
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
    }
}

fn parse_json(param: &'static str, raw: &str) -> Result<Value, QueryError> {
    serde_json::from_str(raw).map_err(|e| QueryError::InvalidJson {
        param,
        message: e.to_string(),
    })
}

fn parse_sort(value: &Value) -> Result<Vec<SortSpec>, QueryError> {
    let obj = value.as_object().ok_or(QueryError::NotAnObject("sort"))?;
    obj.iter()
        .map(|(key, dir)| {
            let descending = match dir.as_i64() {
                Some(1) => false,
                Some(-1) => true,
                _ => return Err(QueryError::InvalidSort(key.clone())),
            };
            Ok(SortSpec {
                key: FieldKey::parse(key),
                descending,
            })
        })
        .collect()
}

fn parse_fields(value: &Value) -> Result<Vec<String>, QueryError> {
    value
        .as_array()
        .ok_or(QueryError::InvalidFields)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or(QueryError::InvalidFields))
        .collect()
}

impl Filter {
    pub fn parse(value: &Value) -> Result<Self, QueryError> {
        let obj = value.as_object().ok_or(QueryError::NotAnObject("query"))?;
        let mut conditions = Vec::new();

        for (raw_key, raw_value) in obj {
            let key = FieldKey::parse(raw_key);
            match raw_value {
                Value::Object(ops) if is_operator_object(ops) => {
                    for (op, arg) in ops {
                        conditions.push(Condition {
                            op: parse_operator(&key, op, arg)?,
                            key: key.clone(),
                        });
                    }
                }
                literal => conditions.push(Condition {
                    op: Op::Eq(operand(&key, literal)?),
                    key,
                }),
            }
        }

        Ok(Filter { conditions })
    }

    /// Append ` AND <condition>` for every condition.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for condition in &self.conditions {
            qb.push(" AND ");
            condition.push_sql(qb);
        }
    }
}

fn is_operator_object(ops: &Map<String, Value>) -> bool {
    !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'))
}

fn parse_operator(key: &FieldKey, op: &str, arg: &Value) -> Result<Op, QueryError> {
    match op {
        "$eq" => Ok(Op::Eq(operand(key, arg)?)),
        "$ne" => Ok(Op::Ne(operand(key, arg)?)),
        "$in" => {
            let items = arg.as_array().ok_or_else(|| QueryError::InvalidValue {
                key: key.name().to_string(),
                message: "$in expects an array".to_string(),
            })?;
            Ok(Op::In(
                items
                    .iter()
                    .map(|v| operand(key, v))
                    .collect::<Result<_, _>>()?,
            ))
        }
        "$exists" => Ok(Op::Exists(match arg {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() != Some(0),
            _ => {
                return Err(QueryError::InvalidValue {
                    key: key.name().to_string(),
                    message: "$exists expects a boolean".to_string(),
                });
            }
        })),
        "$gt" => Ok(Op::Compare(Cmp::Gt, comparable(key, arg)?)),
        "$gte" => Ok(Op::Compare(Cmp::Gte, comparable(key, arg)?)),
        "$lt" => Ok(Op::Compare(Cmp::Lt, comparable(key, arg)?)),
        "$lte" => Ok(Op::Compare(Cmp::Lte, comparable(key, arg)?)),
        other => Err(QueryError::UnknownOperator(other.to_string())),
    }
}

/// Stored answers arrive mostly as strings, so literals are compared in
/// their textual form: `{"_id": "5"}` and `{"_id": 5}` are the same filter.
fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn operand(key: &FieldKey, value: &Value) -> Result<Operand, QueryError> {
    let Some(text) = literal_text(value) else {
        return Ok(Operand::Null);
    };

    Ok(match key {
        FieldKey::Id => text
            .trim()
            .parse::<i64>()
            .map(Operand::Int)
            .unwrap_or(Operand::Never),
        FieldKey::SubmissionTime => Operand::Time(parse_time(key, &text)?),
        _ => Operand::Text(text),
    })
}

/// Range operands: numbers stay numeric for answers so that "10" sorts
/// after "9".
fn comparable(key: &FieldKey, value: &Value) -> Result<Operand, QueryError> {
    match (key, value) {
        (FieldKey::Answer(_), Value::Number(n)) => Ok(n
            .as_f64()
            .map(Operand::Number)
            .unwrap_or(Operand::Never)),
        (_, Value::Null) => Err(QueryError::InvalidValue {
            key: key.name().to_string(),
            message: "cannot compare with null".to_string(),
        }),
        _ => operand(key, value),
    }
}

fn parse_time(key: &FieldKey, text: &str) -> Result<DateTime<Utc>, QueryError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| QueryError::InvalidValue {
            key: key.name().to_string(),
            message: "expected an RFC 3339 timestamp or YYYY-MM-DD".to_string(),
        })
}

impl Condition {
    fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match (&self.key, &self.op) {
            (_, Op::Eq(Operand::Never)) | (_, Op::Compare(_, Operand::Never)) => {
                qb.push("FALSE");
            }
            (_, Op::Ne(Operand::Never)) => {
                qb.push("TRUE");
            }
            (FieldKey::Tags, op) => push_tags(qb, op),
            (key, Op::Exists(exists)) => {
                if !exists {
                    qb.push("NOT ");
                }
                match key {
                    FieldKey::Answer(path) => {
                        qb.push("jsonb_exists(i.json, ").push_bind(path.clone()).push(")");
                    }
                    FieldKey::SubmittedBy => {
                        qb.push("(i.submitted_by IS NOT NULL)");
                    }
                    _ => {
                        qb.push("TRUE");
                    }
                }
            }
            (key, Op::Eq(Operand::Null)) => {
                push_column(qb, key);
                qb.push(" IS NULL");
            }
            (key, Op::Ne(Operand::Null)) => {
                push_column(qb, key);
                qb.push(" IS NOT NULL");
            }
            (key, Op::Eq(value)) => {
                push_column(qb, key);
                qb.push(" = ");
                push_operand(qb, value);
            }
            (key, Op::Ne(value)) => {
                qb.push("(");
                push_column(qb, key);
                qb.push(" IS DISTINCT FROM ");
                push_operand(qb, value);
                qb.push(")");
            }
            (key, Op::In(values)) => {
                let values: Vec<&Operand> = values
                    .iter()
                    .filter(|v| !matches!(v, Operand::Never | Operand::Null))
                    .collect();
                if values.is_empty() {
                    qb.push("FALSE");
                    return;
                }
                push_column(qb, key);
                qb.push(" IN (");
                let mut list = qb.separated(", ");
                for value in values {
                    push_operand_separated(&mut list, value);
                }
                qb.push(")");
            }
            (FieldKey::Answer(path), Op::Compare(cmp, Operand::Number(n))) => {
                qb.push("(CASE WHEN i.json ->> ")
                    .push_bind(path.clone())
                    .push(" ~ '^-?[0-9]+(\\.[0-9]+)?$' THEN (i.json ->> ")
                    .push_bind(path.clone())
                    .push(")::double precision END)")
                    .push(cmp.sql())
                    .push_bind(*n);
            }
            (key, Op::Compare(cmp, value)) => {
                push_column(qb, key);
                qb.push(cmp.sql());
                push_operand(qb, value);
            }
        }
    }
}

fn push_tags(qb: &mut QueryBuilder<'_, Postgres>, op: &Op) {
    let text = |operand: &Operand| match operand {
        Operand::Text(s) => Some(s.clone()),
        _ => None,
    };
    match op {
        Op::Eq(v) => match text(v) {
            Some(tag) => {
                qb.push_bind(tag).push(" = ANY(i.tags)");
            }
            None => {
                qb.push("cardinality(i.tags) = 0");
            }
        },
        Op::Ne(v) => match text(v) {
            Some(tag) => {
                qb.push("NOT (").push_bind(tag).push(" = ANY(i.tags))");
            }
            None => {
                qb.push("cardinality(i.tags) > 0");
            }
        },
        Op::In(values) => {
            let tags: Vec<String> = values.iter().filter_map(text).collect();
            qb.push("i.tags && ").push_bind(tags).push("::text[]");
        }
        Op::Exists(true) => {
            qb.push("cardinality(i.tags) > 0");
        }
        Op::Exists(false) => {
            qb.push("cardinality(i.tags) = 0");
        }
        Op::Compare(..) => {
            qb.push("FALSE");
        }
    }
}

fn push_column(qb: &mut QueryBuilder<'_, Postgres>, key: &FieldKey) {
    match key {
        FieldKey::Id => {
            qb.push("i.id");
        }
        FieldKey::Uuid => {
            qb.push("i.uuid");
        }
        FieldKey::Status => {
            qb.push("i.status");
        }
        FieldKey::SubmissionTime => {
            qb.push("i.created_at");
        }
        FieldKey::SubmittedBy => {
            qb.push("u.username");
        }
        FieldKey::Tags => {
            qb.push("i.tags");
        }
        FieldKey::Answer(path) => {
            qb.push("(i.json ->> ").push_bind(path.clone()).push(")");
        }
    }
}

fn push_operand(qb: &mut QueryBuilder<'_, Postgres>, value: &Operand) {
    match value {
        Operand::Int(n) => {
            qb.push_bind(*n);
        }
        Operand::Time(t) => {
            qb.push_bind(*t);
        }
        Operand::Number(n) => {
            qb.push_bind(n.to_string());
        }
        Operand::Text(s) => {
            qb.push_bind(s.clone());
        }
        Operand::Null | Operand::Never => {
            qb.push("NULL");
        }
    }
}

fn push_operand_separated(
    list: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>,
    value: &Operand,
) {
    match value {
        Operand::Int(n) => {
            list.push_bind(*n);
        }
        Operand::Time(t) => {
            list.push_bind(*t);
        }
        Operand::Number(n) => {
            list.push_bind(n.to_string());
        }
        Operand::Text(s) => {
            list.push_bind(s.clone());
        }
        Operand::Null | Operand::Never => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    fn sql(f: &Filter) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE TRUE");
        f.push_sql(&mut qb);
        qb.into_sql()
    }

    #[test]
    fn id_matches_string_or_number() {
        let expected = Op::Eq(Operand::Int(7));
        assert_eq!(filter(json!({"_id": "7"})).conditions[0].op, expected);
        assert_eq!(filter(json!({"_id": 7})).conditions[0].op, expected);
    }

    #[test]
    fn non_numeric_id_matches_nothing() {
        let f = filter(json!({"_id": "random"}));
        assert_eq!(f.conditions[0].op, Op::Eq(Operand::Never));
        assert!(sql(&f).ends_with("AND FALSE"));
    }

    #[test]
    fn answers_compare_as_text() {
        let f = filter(json!({"transport/available": "none", "age": 12}));
        assert!(f.conditions.contains(&Condition {
            key: FieldKey::Answer("age".into()),
            op: Op::Eq(Operand::Text("12".into())),
        }));
        assert!(f.conditions.contains(&Condition {
            key: FieldKey::Answer("transport/available".into()),
            op: Op::Eq(Operand::Text("none".into())),
        }));

        let single = filter(json!({"transport/available": "none"}));
        assert_eq!(sql(&single), "SELECT 1 WHERE TRUE AND (i.json ->> $1) = $2");
    }

    #[test]
    fn operator_objects_expand_to_conditions() {
        let f = filter(json!({"_id": {"$gte": 2, "$lt": "5"}}));
        assert_eq!(f.conditions.len(), 2);
        assert!(f.conditions.contains(&Condition {
            key: FieldKey::Id,
            op: Op::Compare(Cmp::Gte, Operand::Int(2)),
        }));
        assert!(f.conditions.contains(&Condition {
            key: FieldKey::Id,
            op: Op::Compare(Cmp::Lt, Operand::Int(5)),
        }));
    }

    #[test]
    fn plain_object_values_are_literals() {
        let f = filter(json!({"group": {"a": 1}}));
        assert_eq!(
            f.conditions[0].op,
            Op::Eq(Operand::Text("{\"a\":1}".into()))
        );
    }

    #[test]
    fn tags_use_array_membership() {
        let f = filter(json!({"_tags": "hello"}));
        assert_eq!(sql(&f), "SELECT 1 WHERE TRUE AND $1 = ANY(i.tags)");
    }

    #[test]
    fn in_skips_unmatchable_ids() {
        let f = filter(json!({"_id": {"$in": ["x", 3, "4"]}}));
        assert_eq!(sql(&f), "SELECT 1 WHERE TRUE AND i.id IN ($1, $2)");
    }

    #[test]
    fn submission_time_accepts_dates() {
        let f = filter(json!({"_submission_time": {"$gte": "2024-03-01"}}));
        let Op::Compare(Cmp::Gte, Operand::Time(t)) = &f.conditions[0].op else {
            panic!("unexpected op {:?}", f.conditions[0].op);
        };
        assert_eq!(t.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(Filter::parse(&json!({"_submission_time": "yesterday"})).is_err());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert_eq!(
            Filter::parse(&json!({"a": {"$regex": "x"}})),
            Err(QueryError::UnknownOperator("$regex".into()))
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = DataQuery::parse(Some("{\"_id\":"), None, None, None, None).unwrap_err();
        assert!(matches!(err, QueryError::InvalidJson { param: "query", .. }));
        assert_eq!(
            DataQuery::parse(Some("[1]"), None, None, None, None),
            Err(QueryError::NotAnObject("query"))
        );
    }

    #[test]
    fn sort_and_paging() {
        let q = DataQuery::parse(None, Some("{\"_id\": -1}"), None, Some(5), Some(50_000)).unwrap();
        assert_eq!(q.limit, Some(MAX_LIMIT));
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1");
        q.push_paging(&mut qb);
        assert_eq!(
            qb.into_sql(),
            "SELECT 1 ORDER BY i.id DESC, i.id ASC OFFSET $1 LIMIT $2"
        );
        assert_eq!(
            DataQuery::parse(None, Some("{\"_id\": 2}"), None, None, None),
            Err(QueryError::InvalidSort("_id".into()))
        );
    }

    #[test]
    fn sort_keys_keep_client_order() {
        let q = DataQuery::parse(None, Some(r#"{"name": 1, "_id": -1}"#), None, None, None).unwrap();
        assert_eq!(
            q.sort,
            vec![
                SortSpec {
                    key: FieldKey::Answer("name".into()),
                    descending: false,
                },
                SortSpec {
                    key: FieldKey::Id,
                    descending: true,
                },
            ]
        );

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1");
        q.push_paging(&mut qb);
        assert_eq!(
            qb.into_sql(),
            "SELECT 1 ORDER BY i.json ->> $1 ASC, i.id DESC, i.id ASC"
        );
    }

    #[test]
    fn fields_must_be_strings() {
        let q = DataQuery::parse(None, None, Some("[\"a\", \"_id\"]"), None, None).unwrap();
        assert_eq!(q.fields, Some(vec!["a".to_string(), "_id".to_string()]));
        assert_eq!(
            DataQuery::parse(None, None, Some("[1]"), None, None),
            Err(QueryError::InvalidFields)
        );
    }
}
