//! Node parameter bag
//!
//! Each node carries free-form parameters that only the dialer or connector
//! it targets interprets. The chain layer passes them through untouched.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Immutable string → value mapping attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(HashMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a parameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Booleans are also accepted as `"true"`/`"false"` strings and 0/1.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(invalid(key, "a boolean")),
            },
            Some(Value::Number(n)) => match n.as_u64() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                _ => Err(invalid(key, "a boolean")),
            },
            Some(_) => Err(invalid(key, "a boolean")),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| invalid(key, "an integer")),
            Some(Value::String(s)) => s.parse().map(Some).map_err(|_| invalid(key, "an integer")),
            Some(_) => Err(invalid(key, "an integer")),
        }
    }

    /// Durations are seconds (integer or float) or strings such as
    /// `"250ms"`, `"5s"`, `"2m"`.
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|secs| *secs >= 0.0)
                .map(|secs| Some(Duration::from_secs_f64(secs)))
                .ok_or_else(|| invalid(key, "a duration")),
            Some(Value::String(s)) => parse_duration(s).map(Some).ok_or_else(|| invalid(key, "a duration")),
            Some(_) => Err(invalid(key, "a duration")),
        }
    }

    /// A list of strings, also accepting a single comma-separated string.
    pub fn get_strings(&self, key: &str) -> Result<Vec<String>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(vec![]),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(String::from).ok_or_else(|| invalid(key, "a list of strings")))
                .collect(),
            Some(_) => Err(invalid(key, "a list of strings")),
        }
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Params(iter.into_iter().collect())
    }
}

fn invalid(key: &str, expected: &str) -> Error {
    Error::Config(format!("parameter '{}' must be {}", key, expected))
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: f64 = value.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(secs))
}
