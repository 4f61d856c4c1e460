//! Parameter validation and normalization.
//!
//! Callers hand in a `serde_json::Value`; keys are matched case-insensitively
//! and re-emitted in the PascalCase spelling the core expects. Anything that
//! does not fit is rejected with `InvalidParams` before a request is built.

use serde_json::{Map, Value};

use crate::error::{QrcError, Result};

/// Shape a single parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string.
    Name,
    /// Any string, possibly empty.
    Text,
    /// Any finite number.
    Number,
    /// Number `>= 0`.
    NonNegative,
    /// Number `> 0`.
    Positive,
    /// Integer `>= 1`.
    Index,
    Bool,
    /// Number, string or boolean.
    Scalar,
    /// Number or boolean.
    Level,
    /// Non-empty list of non-empty strings.
    NameList,
    /// Any JSON value.
    Any,
}

/// One entry of a field-table schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

pub const fn req(key: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        key,
        kind,
        required: true,
    }
}

pub const fn opt(key: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        key,
        kind,
        required: false,
    }
}

pub(crate) fn invalid(method: &str, detail: impl Into<String>) -> QrcError {
    QrcError::InvalidParams {
        method: method.to_string(),
        detail: detail.into(),
    }
}

/// Case-insensitive view over a parameter object.
pub(crate) struct Params<'a> {
    method: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    pub(crate) fn new(method: &'a str, params: &'a Value) -> Result<Self> {
        match params {
            Value::Object(map) => Ok(Self { method, map }),
            other => Err(invalid(
                method,
                format!("expected an object, got {}", type_name(other)),
            )),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Reject keys not listed in `allowed`.
    pub(crate) fn only(&self, allowed: &[&str]) -> Result<()> {
        match self
            .map
            .keys()
            .find(|k| !allowed.iter().any(|a| a.eq_ignore_ascii_case(k)))
        {
            Some(unknown) => Err(invalid(self.method, format!("unexpected parameter {unknown}"))),
            None => Ok(()),
        }
    }

    pub(crate) fn field(&self, key: &str, kind: FieldKind) -> Result<Value> {
        let value = self
            .get(key)
            .ok_or_else(|| invalid(self.method, format!("missing {key}")))?;
        check(self.method, key, kind, value)?;
        Ok(value.clone())
    }

    pub(crate) fn optional(&self, key: &str, kind: FieldKind) -> Result<Option<Value>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                check(self.method, key, kind, value)?;
                Ok(Some(value.clone()))
            }
        }
    }

    pub(crate) fn array(&self, key: &str) -> Result<&'a Vec<Value>> {
        match self.get(key) {
            Some(Value::Array(items)) if !items.is_empty() => Ok(items),
            Some(Value::Array(_)) => Err(invalid(self.method, format!("{key} must not be empty"))),
            Some(other) => Err(invalid(
                self.method,
                format!("{key} must be an array, got {}", type_name(other)),
            )),
            None => Err(invalid(self.method, format!("missing {key}"))),
        }
    }
}

/// Validate `value` against `kind`.
pub(crate) fn check(method: &str, key: &str, kind: FieldKind, value: &Value) -> Result<()> {
    let ok = match kind {
        FieldKind::Name => value.as_str().is_some_and(|s| !s.trim().is_empty()),
        FieldKind::Text => value.is_string(),
        FieldKind::Number => value.as_f64().is_some_and(f64::is_finite),
        FieldKind::NonNegative => value.as_f64().is_some_and(|v| v.is_finite() && v >= 0.0),
        FieldKind::Positive => value.as_f64().is_some_and(|v| v.is_finite() && v > 0.0),
        FieldKind::Index => value.as_u64().is_some_and(|v| v >= 1),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Scalar => value.is_number() || value.is_string() || value.is_boolean(),
        FieldKind::Level => value.is_number() || value.is_boolean(),
        FieldKind::NameList => match value {
            Value::Array(items) => {
                !items.is_empty()
                    && items
                        .iter()
                        .all(|i| i.as_str().is_some_and(|s| !s.trim().is_empty()))
            }
            _ => false,
        },
        FieldKind::Any => true,
    };

    if ok {
        Ok(())
    } else {
        Err(invalid(
            method,
            format!("{key} must be {}, got {value}", describe(kind)),
        ))
    }
}

/// Encode an object parameter by a field table.
pub(crate) fn encode_fields(method: &str, fields: &[FieldSpec], params: &Value) -> Result<Value> {
    // Methods whose fields are all optional may be called without params
    if params.is_null() && fields.iter().all(|f| !f.required) {
        return Ok(Value::Object(Map::new()));
    }

    let view = Params::new(method, params)?;
    let allowed: Vec<&str> = fields.iter().map(|f| f.key).collect();
    view.only(&allowed)?;

    let mut out = Map::new();
    for spec in fields {
        let value = if spec.required {
            Some(view.field(spec.key, spec.kind)?)
        } else {
            view.optional(spec.key, spec.kind)?
        };
        if let Some(value) = value {
            out.insert(spec.key.to_string(), value);
        }
    }
    Ok(Value::Object(out))
}

fn describe(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Name => "a non-empty string",
        FieldKind::Text => "a string",
        FieldKind::Number => "a number",
        FieldKind::NonNegative => "a non-negative number",
        FieldKind::Positive => "a positive number",
        FieldKind::Index => "an integer >= 1",
        FieldKind::Bool => "a boolean",
        FieldKind::Scalar => "a number, string or boolean",
        FieldKind::Level => "a number or boolean",
        FieldKind::NameList => "a non-empty list of names",
        FieldKind::Any => "any value",
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
