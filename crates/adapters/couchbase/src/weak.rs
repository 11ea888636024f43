//! Lenient value coercion for loosely typed configuration maps
//!
//! Hosts hand configuration over as JSON-ish maps where `"true"`, `1` and `true`
//! all mean the same thing. These helpers accept every reasonable spelling and
//! reject the rest with a validation error naming the offending key.

use cbdb_errors::{AppError, AppResult};
use serde_json::Value;

fn mismatch(key: &str, expected: &str, value: &Value) -> AppError {
    AppError::validation(format!(
        "'{}' expected type '{}', got unconvertible value {}",
        key, expected, value
    ))
}

pub(crate) fn string(key: &str, value: &Value) -> AppResult<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            // plain decimal, shortest round-trip, no exponent
            Some(f) => Ok(format!("{}", f)),
            None => Err(mismatch(key, "string", value)),
        },
        Value::Number(n) => Ok(n.to_string()),
        other => Err(mismatch(key, "string", other)),
    }
}

pub(crate) fn boolean(key: &str, value: &Value) -> AppResult<bool> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.as_str() {
            "" => Ok(false),
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err(mismatch(key, "bool", value)),
        },
        other => Err(mismatch(key, "bool", other)),
    }
}

pub(crate) fn integer(key: &str, value: &Value) -> AppResult<i64> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(mismatch(key, "int", value)),
            }
        }
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| mismatch(key, "int", value)),
        other => Err(mismatch(key, "int", other)),
    }
}
