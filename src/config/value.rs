//! Typed view over SU2 option values.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::Su2Error;

/// A parsed SU2 option value.
///
/// The raw line text stays authoritative inside [`super::ConfigDocument`];
/// this type is only the interpreted view handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Comma-separated list: `a, b, c`
    List(Vec<ConfigValue>),
    /// Parenthesized list as used by marker options: `( wall, farfield )`
    Group(Vec<ConfigValue>),
}

impl ConfigValue {
    /// Interpret the value portion of a config line.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            return ConfigValue::Group(split_items(inner));
        }
        if let Some(text) = unquote(raw) {
            return ConfigValue::Text(text.to_string());
        }
        if raw.contains(',') {
            return ConfigValue::List(split_items(raw));
        }
        parse_scalar(raw)
    }

    /// Convert a JSON value from a tool request into a config value.
    pub fn from_json(value: &Value) -> Result<Self, Su2Error> {
        match value {
            Value::Bool(b) => Ok(ConfigValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ConfigValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ConfigValue::Float(f))
                } else {
                    Err(Su2Error::InvalidParams(format!("unsupported number: {n}")))
                }
            }
            Value::String(s) => Ok(ConfigValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(ConfigValue::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(ConfigValue::List),
            Value::Null | Value::Object(_) => Err(Su2Error::InvalidParams(
                "config values must be strings, numbers, booleans, or arrays".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

fn split_items(raw: &str) -> Vec<ConfigValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match unquote(s) {
            Some(text) => ConfigValue::Text(text.to_string()),
            None => parse_scalar(s),
        })
        .collect()
}

fn unquote(raw: &str) -> Option<&str> {
    if raw.len() < 2 {
        return None;
    }
    ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
}

fn parse_scalar(raw: &str) -> ConfigValue {
    match raw.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" => return ConfigValue::Bool(true),
        "NO" | "FALSE" => return ConfigValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return ConfigValue::Int(i);
    }
    // Only plain decimal/exponent notation counts as a float; "inf" and "nan" stay text.
    let numeric_chars = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if numeric_chars && raw.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = raw.parse::<f64>() {
            return ConfigValue::Float(f);
        }
    }
    ConfigValue::Text(raw.to_string())
}

fn join(items: &[ConfigValue]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(true) => write!(f, "YES"),
            ConfigValue::Bool(false) => write!(f, "NO"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            // Debug keeps the decimal point so 5.0 does not re-parse as an integer.
            ConfigValue::Float(v) => write!(f, "{v:?}"),
            ConfigValue::Text(s) => write!(f, "{s}"),
            ConfigValue::List(items) => write!(f, "{}", join(items)),
            ConfigValue::Group(items) => write!(f, "( {} )", join(items)),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(value.into())
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(values: Vec<T>) -> Self {
        ConfigValue::List(values.into_iter().map(Into::into).collect())
    }
}
