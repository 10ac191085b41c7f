//! Parameter values and the parameter mapping.
//!
//! Templates never see host objects directly: callers hand over a [`Params`]
//! mapping of names to [`Value`]s, and nested properties are reached with
//! dotted paths (`user.address.city`) instead of reflection.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{TwoSqlError, TwoSqlResult};

/// Format used when a datetime is spliced into SQL text.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A dynamic parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    /// A sequence, iterated by `FOR` and expanded by `PAREN#`.
    List(Vec<Value>),
    /// An opaque object whose members are reached with dotted paths.
    Object(BTreeMap<String, Value>),
}

/// The semantic kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    DateTime,
    Sequence,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::DateTime => "datetime",
            ValueKind::Sequence => "sequence",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Int(_) | Value::Float(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::List(_) => ValueKind::Sequence,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by `IF` guards and boolean connectives.
    ///
    /// `null`, `false`, zero, and empty strings, lists and objects are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::DateTime(_) => true,
            Value::List(items) => !items.is_empty(),
            Value::Object(members) => !members.is_empty(),
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Equality as seen by `==` in expressions.
    ///
    /// Numbers compare numerically across `Int`/`Float`; values of different
    /// kinds are never equal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => self == other,
        }
    }

    /// Natural ordering for numbers, strings and datetimes.
    ///
    /// Returns `None` when the two kinds cannot be ordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Text spliced into SQL by an embedded value directive.
    pub fn sql_text(&self) -> TwoSqlResult<String> {
        match self {
            Value::Null => Ok("NULL".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(n) => Ok(n.to_string()),
            Value::Float(n) => Ok(float_literal(*n)),
            Value::String(s) => Ok(s.clone()),
            Value::DateTime(dt) => Ok(dt.format(DATETIME_FORMAT).to_string()),
            Value::List(items) => {
                let parts = items
                    .iter()
                    .map(Value::sql_text)
                    .collect::<TwoSqlResult<Vec<_>>>()?;
                Ok(parts.join(", "))
            }
            Value::Object(_) => Err(TwoSqlError::mismatch(
                "an object cannot be embedded into SQL text",
            )),
        }
    }

    /// Infer a value from command-line text.
    ///
    /// Recognizes `null`, booleans, integers, floats, ISO dates/datetimes and
    /// JSON arrays/objects; anything else is a string.
    pub fn infer(text: &str) -> Value {
        let trimmed = text.trim();
        match trimmed {
            "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Int(n);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Value::Float(n);
        }
        for format in ["%Y-%m-%dT%H:%M:%S", DATETIME_FORMAT] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Value::DateTime(dt);
            }
        }
        if let Some(dt) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Value::DateTime(dt);
        }
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
                return Value::from(json);
            }
        }
        Value::String(text.to_string())
    }

    /// Walk dotted path segments below this value.
    fn walk<'v, 's>(&'v self, segments: impl Iterator<Item = &'s str>) -> Option<&'v Value> {
        let mut current = self;
        for segment in segments {
            current = match current {
                Value::Object(members) => members.get(segment)?,
                Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Float text that always reads back as a float: `1.0`, not `1`.
fn float_literal(n: f64) -> String {
    let text = n.to_string();
    if n.is_finite() && !text.contains(['.', 'e', 'E']) {
        format!("{}.0", text)
    } else {
        text
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => f.write_str(&float_literal(*n)),
            Value::String(s) => write!(f, "'{}'", s),
            Value::DateTime(dt) => write!(f, "'{}'", dt.format(DATETIME_FORMAT)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(members) => {
                write!(f, "{{")?;
                for (i, (k, v)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(members: BTreeMap<String, Value>) -> Self {
        Value::Object(members)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(members) => Value::Object(
                members
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Something names and dotted paths can be resolved against.
pub trait Scope {
    fn resolve(&self, path: &str) -> Option<&Value>;
}

/// The parameter mapping for one execution.
///
/// Read-only for the duration of a transform pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, builder style.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Exact lookup, without dotted-path walking.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Build parameters from a JSON object.
    pub fn from_json(json: serde_json::Value) -> TwoSqlResult<Self> {
        match json {
            serde_json::Value::Object(members) => Ok(members
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect()),
            other => Err(TwoSqlError::InvalidParameter(format!(
                "parameters must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Parse a `name=value` assignment, inferring the value's kind.
    pub fn parse_assignment(assignment: &str) -> TwoSqlResult<(String, Value)> {
        let (name, raw) = assignment.split_once('=').ok_or_else(|| {
            TwoSqlError::InvalidParameter(format!("expected name=value, got '{}'", assignment))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TwoSqlError::InvalidParameter(format!(
                "missing parameter name in '{}'",
                assignment
            )));
        }
        Ok((name.to_string(), Value::infer(raw)))
    }
}

impl Scope for Params {
    fn resolve(&self, path: &str) -> Option<&Value> {
        resolve_in(&self.values, path)
    }
}

/// Resolve a dotted path against a map of named roots.
///
/// An exact key match wins over walking from the head segment.
pub(crate) fn resolve_in<'v>(roots: &'v BTreeMap<String, Value>, path: &str) -> Option<&'v Value> {
    if let Some(v) = roots.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let head = segments.next()?;
    roots.get(head)?.walk(segments)
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Value {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Value::from("Osaka"));
        let mut user = BTreeMap::new();
        user.insert("name".to_string(), Value::from("aki"));
        user.insert("address".to_string(), Value::Object(address));
        Value::Object(user)
    }

    #[test]
    fn test_dotted_resolution() {
        let params = Params::new().param("user", user());
        assert_eq!(params.resolve("user.name"), Some(&Value::from("aki")));
        assert_eq!(params.resolve("user.address.city"), Some(&Value::from("Osaka")));
        assert_eq!(params.resolve("user.missing"), None);
        assert_eq!(params.resolve("nobody"), None);
    }

    #[test]
    fn test_exact_dotted_key_wins() {
        let params = Params::new()
            .param("user", user())
            .param("user.name", "override");
        assert_eq!(params.resolve("user.name"), Some(&Value::from("override")));
    }

    #[test]
    fn test_list_index_path() {
        let params = Params::new().param("ids", vec![10, 20]);
        assert_eq!(params.resolve("ids.1"), Some(&Value::Int(20)));
        assert_eq!(params.resolve("ids.2"), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }

    #[test]
    fn test_loose_eq_and_compare() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).loose_eq(&Value::from("1")));
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(Value::from("a").compare(&Value::from("b")), Some(Ordering::Less));
        assert_eq!(Value::Bool(true).compare(&Value::Bool(false)), None);
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(Value::from("users").sql_text().unwrap(), "users");
        assert_eq!(Value::from(vec!["id", "name"]).sql_text().unwrap(), "id, name");
        assert_eq!(Value::Null.sql_text().unwrap(), "NULL");
        assert_eq!(Value::Float(1.0).sql_text().unwrap(), "1.0");
        assert_eq!(Value::Float(-2.5).sql_text().unwrap(), "-2.5");
        assert_eq!(Value::Float(1e20).sql_text().unwrap(), "100000000000000000000.0");
        assert!(user().sql_text().is_err());
    }

    #[test]
    fn test_infer() {
        assert_eq!(Value::infer("42"), Value::Int(42));
        assert_eq!(Value::infer("4.5"), Value::Float(4.5));
        assert_eq!(Value::infer("true"), Value::Bool(true));
        assert_eq!(Value::infer("null"), Value::Null);
        assert_eq!(Value::infer("[1, 2]"), Value::from(vec![1, 2]));
        assert_eq!(Value::infer("alice"), Value::from("alice"));
        assert_eq!(Value::infer("2024-03-01").kind(), ValueKind::DateTime);
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({ "id": 5, "tags": ["a", "b"], "score": 1.5 });
        let params = Params::from_json(json).unwrap();
        assert_eq!(params.get("id"), Some(&Value::Int(5)));
        assert_eq!(params.get("tags"), Some(&Value::from(vec!["a", "b"])));
        assert_eq!(params.get("score"), Some(&Value::Float(1.5)));
        assert!(Params::from_json(serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let (name, value) = Params::parse_assignment("id=7").unwrap();
        assert_eq!(name, "id");
        assert_eq!(value, Value::Int(7));
        assert!(Params::parse_assignment("novalue").is_err());
        assert!(Params::parse_assignment("=3").is_err());
    }
}
