// Typed register values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A register value after type classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Classify a raw device string.
    ///
    /// Empty and `null` mean no value. `"0"`/`"1"` and boolean words are
    /// booleans, anything containing `.` that parses is a float, digit
    /// strings are integers, and the rest stays text.
    pub fn classify(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("none") {
            return None;
        }

        match raw.to_ascii_lowercase().as_str() {
            "0" | "false" | "off" => return Some(Self::Bool(false)),
            "1" | "true" | "on" => return Some(Self::Bool(true)),
            _ => {}
        }

        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return Some(Self::Float(f));
            }
        } else if let Ok(i) = raw.parse::<i64>() {
            return Some(Self::Int(i));
        }

        Some(Self::Text(raw.to_owned()))
    }

    /// Numeric view. Booleans count as 0/1.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }

    /// Integer view used for value-map lookups.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            Self::Float(_) | Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_raw_strings() {
        assert_eq!(Value::classify("45.5"), Some(Value::Float(45.5)));
        assert_eq!(Value::classify("-12.0"), Some(Value::Float(-12.0)));
        assert_eq!(Value::classify("42"), Some(Value::Int(42)));
        assert_eq!(Value::classify("-3"), Some(Value::Int(-3)));
        assert_eq!(Value::classify("0"), Some(Value::Bool(false)));
        assert_eq!(Value::classify("1"), Some(Value::Bool(true)));
        assert_eq!(Value::classify("ON"), Some(Value::Bool(true)));
        assert_eq!(Value::classify("false"), Some(Value::Bool(false)));
        assert_eq!(Value::classify("1.2.3"), Some(Value::Text("1.2.3".into())));
        assert_eq!(Value::classify("Manual"), Some(Value::Text("Manual".into())));
    }

    #[test]
    fn empty_and_null_mean_no_value() {
        assert_eq!(Value::classify(""), None);
        assert_eq!(Value::classify("   "), None);
        assert_eq!(Value::classify("null"), None);
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Int(3).as_index(), Some(3));
        assert_eq!(Value::Float(3.0).as_index(), None);
        assert_eq!(Value::Text("x".into()).as_f64(), None);
    }
}
