//! Tool argument normalisation
//!
//! Required strings reject absent, non-string and blank values. Enums are
//! optional unless asked for and list the accepted set on a bad value.
//! Numbers accept any JSON number (or numeric string); booleans default to
//! false.

use crate::error::{GorevError, Result};
use crate::i18n::{self, Lang};
use crate::tasks::parse_date;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;

static EMPTY: std::sync::LazyLock<Map<String, Value>> = std::sync::LazyLock::new(Map::new);

/// Borrowed view over a tool's argument object
pub struct Args<'a> {
    map: &'a Map<String, Value>,
    lang: Lang,
}

impl<'a> Args<'a> {
    /// Anything that is not an object is treated as no arguments.
    pub fn new(value: &'a Value, lang: Lang) -> Self {
        Self {
            map: value.as_object().unwrap_or(&EMPTY),
            lang,
        }
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn required_error(&self, key: &str) -> GorevError {
        GorevError::Validation(i18n::tf(self.lang, "error.required_param", &[("Param", key)]))
    }

    pub fn require_str(&self, key: &str) -> Result<String> {
        match self.get(key).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => Err(self.required_error(key)),
        }
    }

    /// String value as sent; non-strings count as absent
    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Like [`Args::opt_str`] but blank strings count as absent
    pub fn opt_non_blank(&self, key: &str) -> Option<String> {
        self.opt_str(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn opt_enum<T>(&self, key: &str, names: &[&str], parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(s).map(Some).ok_or_else(|| self.enum_error(key, names)),
            None => Err(self.enum_error(key, names)),
        }
    }

    pub fn require_enum<T>(&self, key: &str, names: &[&str], parse: impl Fn(&str) -> Option<T>) -> Result<T> {
        self.opt_enum(key, names, parse)?
            .ok_or_else(|| self.enum_error(key, names))
    }

    /// Absent falls back to `default`; an invalid value is still an error.
    pub fn enum_or<T>(&self, key: &str, names: &[&str], parse: impl Fn(&str) -> Option<T>, default: T) -> Result<T> {
        Ok(self.opt_enum(key, names, parse)?.unwrap_or(default))
    }

    pub fn enum_error(&self, key: &str, names: &[&str]) -> GorevError {
        GorevError::Validation(i18n::tf(
            self.lang,
            "error.invalid_enum",
            &[("Param", key), ("Values", &names.join(", "))],
        ))
    }

    pub fn number(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            _ => None,
        }
    }

    /// Zero or negative yields `default`; values above `max` are clamped.
    pub fn limit(&self, key: &str, default: u32, max: u32) -> u32 {
        crate::tasks::filter::normalize_limit(self.number(key), default, max)
    }

    pub fn offset(&self, key: &str) -> u32 {
        crate::tasks::filter::normalize_offset(self.number(key))
    }

    pub fn flag(&self, key: &str) -> bool {
        self.flag_or(key, false)
    }

    pub fn flag_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => default,
        }
    }

    /// Array of strings, or a comma-separated string. Blank items are dropped.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        let items: Vec<String> = match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Object of scalar values rendered as strings
    pub fn string_map(&self, key: &str) -> HashMap<String, String> {
        let Some(Value::Object(map)) = self.get(key) else {
            return HashMap::new();
        };
        map.iter()
            .filter_map(|(k, v)| {
                let s = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k.clone(), s))
            })
            .collect()
    }

    /// `None` when absent, `Some(None)` for an empty string (clear),
    /// `Some(Some(day))` for a valid `YYYY-MM-DD`.
    pub fn date(&self, key: &str) -> Result<Option<Option<NaiveDate>>> {
        let Some(raw) = self.opt_str(key) else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(Some(None));
        }
        parse_date(&raw).map(|d| Some(Some(d))).ok_or_else(|| {
            GorevError::Validation(i18n::tf(self.lang, "error.invalid_date", &[("Param", key)]))
        })
    }

    /// Nested object, or an empty one
    pub fn object(&self, key: &str) -> Value {
        match self.get(key) {
            Some(v @ Value::Object(_)) => v.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}
