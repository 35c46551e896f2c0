use crate::types::logical_type::LogicalType;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant known at planning time: a literal or a supplied bind variable.
///
/// Floats are wrapped in `OrderedFloat` so values can be compared, hashed and
/// deduplicated when they are collected into IN-lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(OrderedFloat<f64>),
    Varchar(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn double(value: f64) -> Self {
        Value::Double(OrderedFloat(value))
    }

    pub fn varchar(value: impl Into<String>) -> Self {
        Value::Varchar(value.into())
    }

    pub fn get_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Null,
            Value::Boolean(_) => LogicalType::Boolean,
            Value::Integer(_) => LogicalType::BigInt,
            Value::Double(_) => LogicalType::Double,
            Value::Varchar(_) => LogicalType::Varchar,
        }
    }

    /// SQL truthiness; `None` for NULL
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Double(d) => Some(d.0 != 0.0),
            Value::Varchar(s) => Some(numeric_prefix(s) != 0.0),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(*b as i64),
            Value::Double(d) if d.0.fract() == 0.0 => Some(d.0 as i64),
            Value::Varchar(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(d.0),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Varchar(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Bytes fed to vindex and split hash functions. Integers hash as their
    /// 8-byte big-endian two's complement form so that `5` and `'5'` differ.
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Boolean(b) => vec![*b as u8],
            Value::Integer(i) => i.to_be_bytes().to_vec(),
            Value::Double(d) => d.0.to_bits().to_be_bytes().to_vec(),
            Value::Varchar(s) => s.as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d.0),
            Value::Varchar(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Numeric value of a string as MySQL reads it: leading whitespace is
/// skipped and the longest numeric prefix counts, `0` when there is none
fn numeric_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let int_end = digits(end);
    let mut mantissa = int_end > end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits(end + 1);
        if mantissa || frac_end > end + 1 {
            mantissa = true;
            end = frac_end;
        }
    }
    if !mantissa {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_end = digits(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}
