//! Outcome values produced by queries and carried by evidence.
//!
//! Outcomes form a closed set of variants with a total order, so they can
//! key histograms and signatures directly. Numeric conversion is explicit
//! (`as_f64`) instead of implicit coercion.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A query outcome or an evidence value.
///
/// Ordering sorts by variant first (`Null < Bool < Int < Float < Symbol`),
/// then by value. Floats compare with `f64::total_cmp`, so `NaN` has a
/// stable place and `-0.0` and `0.0` are distinct outcomes.
///
/// # Examples
///
/// ```
/// use onlinepf::OutcomeValue;
///
/// let v = OutcomeValue::parse_literal("3").unwrap();
/// assert_eq!(v, OutcomeValue::Int(3));
/// assert_eq!(v.as_f64(), Some(3.0));
///
/// let s = OutcomeValue::parse_literal("left").unwrap();
/// assert!(s.as_f64().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutcomeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An opaque identifier, e.g. a model object or an enum constant.
    Symbol(String),
}

impl OutcomeValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view used by weighted averages.
    ///
    /// `Int` and `Float` convert directly, `Bool` maps to `1.0`/`0.0`.
    /// `Symbol` and `Null` have no numeric value.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(true) => Some(1.0),
            Self::Bool(false) => Some(0.0),
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Symbol(_) | Self::Null => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Symbol(_) => "symbol",
        }
    }

    /// Parses an evidence literal.
    ///
    /// Accepted forms: `true`, `false`, `null`, integers, floats, double
    /// quoted strings and bare identifiers. Strings and identifiers both
    /// become `Symbol`.
    pub fn parse_literal(literal: &str) -> Result<Self, ValidationError> {
        let text = literal.trim();
        let invalid = || ValidationError::InvalidLiteral {
            literal: literal.to_string(),
        };

        match text {
            "" => return Err(invalid()),
            "true" => return Ok(Self::Bool(true)),
            "false" => return Ok(Self::Bool(false)),
            "null" => return Ok(Self::Null),
            _ => {}
        }

        if let Some(inner) = text.strip_prefix('"') {
            return inner
                .strip_suffix('"')
                .filter(|s| !s.contains('"'))
                .map(|s| Self::Symbol(s.to_string()))
                .ok_or_else(invalid);
        }

        if let Ok(v) = text.parse::<i64>() {
            return Ok(Self::Int(v));
        }

        let first = text.chars().next().ok_or_else(invalid)?;
        if first.is_ascii_digit() || first == '-' || first == '+' || first == '.' {
            return text.parse::<f64>().map(Self::Float).map_err(|_| invalid());
        }

        if (first.is_alphabetic() || first == '_')
            && text.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return Ok(Self::Symbol(text.to_string()));
        }

        Err(invalid())
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Symbol(_) => 4,
        }
    }
}

impl Default for OutcomeValue {
    fn default() -> Self {
        Self::Null
    }
}

impl Ord for OutcomeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Symbol(a), Self::Symbol(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for OutcomeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OutcomeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OutcomeValue {}

impl Hash for OutcomeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            // total_cmp equality is bitwise equality.
            Self::Float(v) => v.to_bits().hash(state),
            Self::Symbol(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for OutcomeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Symbol(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for OutcomeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for OutcomeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for OutcomeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for OutcomeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OutcomeValue {
    fn from(v: &str) -> Self {
        Self::Symbol(v.to_string())
    }
}

impl From<String> for OutcomeValue {
    fn from(v: String) -> Self {
        Self::Symbol(v)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(OutcomeValue::parse_literal("true").unwrap(), OutcomeValue::Bool(true));
        assert_eq!(OutcomeValue::parse_literal(" false ").unwrap(), OutcomeValue::Bool(false));
        assert_eq!(OutcomeValue::parse_literal("null").unwrap(), OutcomeValue::Null);
        assert_eq!(OutcomeValue::parse_literal("-7").unwrap(), OutcomeValue::Int(-7));
        assert_eq!(OutcomeValue::parse_literal("2.5").unwrap(), OutcomeValue::Float(2.5));
        assert_eq!(OutcomeValue::parse_literal("1e3").unwrap(), OutcomeValue::Float(1000.0));
        assert_eq!(
            OutcomeValue::parse_literal("\"left turn\"").unwrap(),
            OutcomeValue::Symbol("left turn".to_string())
        );
        assert_eq!(
            OutcomeValue::parse_literal("argload").unwrap(),
            OutcomeValue::Symbol("argload".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(OutcomeValue::parse_literal("").is_err());
        assert!(OutcomeValue::parse_literal("\"open").is_err());
        assert!(OutcomeValue::parse_literal("3x").is_err());
        assert!(OutcomeValue::parse_literal("a b").is_err());
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(OutcomeValue::Int(4).as_f64(), Some(4.0));
        assert_eq!(OutcomeValue::Float(0.25).as_f64(), Some(0.25));
        assert_eq!(OutcomeValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(OutcomeValue::Bool(false).as_f64(), Some(0.0));
        assert!(OutcomeValue::Symbol("x".into()).as_f64().is_none());
        assert!(OutcomeValue::Null.as_f64().is_none());
    }

    #[test]
    fn test_ordering_by_variant_then_value() {
        let mut values = vec![
            OutcomeValue::Symbol("b".into()),
            OutcomeValue::Float(1.5),
            OutcomeValue::Int(3),
            OutcomeValue::Int(-1),
            OutcomeValue::Bool(true),
            OutcomeValue::Null,
            OutcomeValue::Symbol("a".into()),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                OutcomeValue::Null,
                OutcomeValue::Bool(true),
                OutcomeValue::Int(-1),
                OutcomeValue::Int(3),
                OutcomeValue::Float(1.5),
                OutcomeValue::Symbol("a".into()),
                OutcomeValue::Symbol("b".into()),
            ]
        );
    }

    #[test]
    fn test_float_equality_is_total() {
        assert_eq!(OutcomeValue::Float(f64::NAN), OutcomeValue::Float(f64::NAN));
        assert_ne!(OutcomeValue::Float(0.0), OutcomeValue::Float(-0.0));
        assert_ne!(OutcomeValue::Int(1), OutcomeValue::Float(1.0));
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(OutcomeValue::Float(2.0));
        set.insert(OutcomeValue::Float(2.0));
        set.insert(OutcomeValue::Int(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(OutcomeValue::Int(3).to_string(), "3");
        assert_eq!(OutcomeValue::Float(3.0).to_string(), "3.0");
        assert_eq!(OutcomeValue::Bool(false).to_string(), "false");
        assert_eq!(OutcomeValue::Symbol("left".into()).to_string(), "left");
        assert_eq!(OutcomeValue::Null.to_string(), "null");
    }

    #[test]
    fn test_serialization() {
        let val = OutcomeValue::Symbol("x".into());
        let json = serde_json::to_string(&val).unwrap();
        let back: OutcomeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}
