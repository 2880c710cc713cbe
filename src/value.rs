//! Parameter values and their constraint checks.
//!
//! A leaf parameter holds exactly one [`ParamValue`]. The declared
//! [`ValueType`] plus [`Constraints`] decide which values are admissible;
//! [`check`] is the single gate every mutation passes through.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime value of a leaf parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    /// One entry of the parameter's `limits`.
    Enum(String),
    /// Font family name. Font metrics are resolved by the geometry kernel.
    Font(String),
}

/// Declared type of a leaf parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Float,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "list")]
    Enum,
    Font,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Float => "float",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
            ValueType::Enum => "enum",
            ValueType::Font => "font",
        };
        f.write_str(name)
    }
}

/// Constraints attached to a leaf parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Admissible values of an enum parameter, in display order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Unit shown next to the editor (`mm`, `pts`). Display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl ParamValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ParamValue::Float(_) => ValueType::Float,
            ParamValue::Int(_) => ValueType::Int,
            ParamValue::Bool(_) => ValueType::Bool,
            ParamValue::Str(_) => ValueType::Str,
            ParamValue::Enum(_) => ValueType::Enum,
            ParamValue::Font(_) => ValueType::Font,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) | ParamValue::Enum(s) | ParamValue::Font(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Key used to look the value up in a conditional policy's cases.
    pub fn as_key(&self) -> String {
        match self {
            ParamValue::Str(s) | ParamValue::Enum(s) | ParamValue::Font(s) => s.clone(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
        }
    }

    /// Parse user text (CLI `--set`, editor input) for a parameter of type `ty`.
    pub fn parse(ty: ValueType, text: &str) -> Result<ParamValue, String> {
        coerce(ty, &serde_json::Value::String(text.to_string()))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(s) | ParamValue::Enum(s) | ParamValue::Font(s) => f.write_str(s),
        }
    }
}

/// Validate `value` against the declared type and constraints.
///
/// Returns the value as it will be stored. The only conversion performed is
/// integer to float widening; a string never becomes a number here.
pub fn check(ty: ValueType, constraints: &Constraints, value: ParamValue) -> Result<ParamValue, String> {
    let value = match (ty, value) {
        (ValueType::Float, ParamValue::Int(i)) => ParamValue::Float(i as f64),
        (ValueType::Enum, ParamValue::Str(s)) => ParamValue::Enum(s),
        (ValueType::Font, ParamValue::Str(s)) => ParamValue::Font(s),
        (ValueType::Str, ParamValue::Enum(s) | ParamValue::Font(s)) => ParamValue::Str(s),
        (_, v) => v,
    };

    if value.value_type() != ty {
        return Err(format!("expected {ty}, got {}", value.value_type()));
    }

    match &value {
        ParamValue::Float(v) => {
            if !v.is_finite() {
                return Err(format!("{v} is not finite"));
            }
            check_bounds(*v, constraints)?;
        }
        ParamValue::Int(v) => check_bounds(*v as f64, constraints)?,
        ParamValue::Enum(s) => {
            let limits = constraints
                .limits
                .as_ref()
                .ok_or_else(|| "enum parameter declares no limits".to_string())?;
            if !limits.iter().any(|l| l == s) {
                return Err(format!("{s:?} is not one of {limits:?}"));
            }
        }
        ParamValue::Font(s) => {
            if s.trim().is_empty() {
                return Err("font family must not be empty".to_string());
            }
        }
        ParamValue::Bool(_) | ParamValue::Str(_) => {}
    }

    Ok(value)
}

fn check_bounds(v: f64, constraints: &Constraints) -> Result<(), String> {
    if let Some(min) = constraints.min {
        if v < min {
            return Err(format!("{v} is below the minimum {min}"));
        }
    }
    if let Some(max) = constraints.max {
        if v > max {
            return Err(format!("{v} is above the maximum {max}"));
        }
    }
    Ok(())
}

/// Convert a declared (schema) value to the parameter type.
///
/// Declarations are lenient: `'2.0'` is accepted for a float and `1` for a
/// string. Runtime edits go through [`check`] instead.
pub fn coerce(ty: ValueType, raw: &serde_json::Value) -> Result<ParamValue, String> {
    use serde_json::Value as Json;

    let mismatch = || format!("cannot use {raw} as {ty}");

    let value = match ty {
        ValueType::Float => match raw {
            Json::Number(n) => n.as_f64().map(ParamValue::Float),
            Json::String(s) => s.trim().parse::<f64>().ok().map(ParamValue::Float),
            _ => None,
        },
        ValueType::Int => match raw {
            Json::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(ParamValue::Int),
            Json::String(s) => s.trim().parse::<i64>().ok().map(ParamValue::Int),
            _ => None,
        },
        ValueType::Bool => match raw {
            Json::Bool(b) => Some(ParamValue::Bool(*b)),
            Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(ParamValue::Bool(true)),
                "false" | "no" | "off" | "0" => Some(ParamValue::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ValueType::Str => match raw {
            Json::String(s) => Some(ParamValue::Str(s.clone())),
            Json::Number(n) => Some(ParamValue::Str(n.to_string())),
            Json::Bool(b) => Some(ParamValue::Str(b.to_string())),
            _ => None,
        },
        ValueType::Enum => raw.as_str().map(|s| ParamValue::Enum(s.to_string())),
        ValueType::Font => raw.as_str().map(|s| ParamValue::Font(s.to_string())),
    };

    value.ok_or_else(mismatch)
}

/// Value used when a declaration omits `value`.
pub fn default_for(ty: ValueType, constraints: &Constraints) -> Option<ParamValue> {
    match ty {
        ValueType::Float => Some(ParamValue::Float(constraints.min.unwrap_or(0.0).max(0.0))),
        ValueType::Int => Some(ParamValue::Int(constraints.min.unwrap_or(0.0).max(0.0) as i64)),
        ValueType::Bool => Some(ParamValue::Bool(false)),
        ValueType::Str => Some(ParamValue::Str(String::new())),
        ValueType::Enum => constraints
            .limits
            .as_ref()
            .and_then(|l| l.first())
            .map(|s| ParamValue::Enum(s.clone())),
        ValueType::Font => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shapes() -> Constraints {
        Constraints {
            limits: Some(vec!["box".into(), "sphere".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_enum_outside_limits_rejected() {
        let err = check(ValueType::Enum, &shapes(), ParamValue::Str("cone".into())).unwrap_err();
        assert!(err.contains("cone"));
        let ok = check(ValueType::Enum, &shapes(), ParamValue::Str("sphere".into())).unwrap();
        assert_eq!(ok, ParamValue::Enum("sphere".into()));
    }

    #[test]
    fn test_int_widens_to_float_but_string_does_not() {
        let c = Constraints::default();
        assert_eq!(
            check(ValueType::Float, &c, ParamValue::Int(2)).unwrap(),
            ParamValue::Float(2.0)
        );
        assert!(check(ValueType::Float, &c, ParamValue::Str("2.0".into())).is_err());
    }

    #[test]
    fn test_bounds() {
        let c = Constraints {
            min: Some(0.5),
            max: Some(10.0),
            ..Default::default()
        };
        assert!(check(ValueType::Float, &c, ParamValue::Float(0.1)).is_err());
        assert!(check(ValueType::Float, &c, ParamValue::Float(11.0)).is_err());
        assert!(check(ValueType::Float, &c, ParamValue::Float(f64::NAN)).is_err());
        assert!(check(ValueType::Int, &c, ParamValue::Int(3)).is_ok());
    }

    #[test]
    fn test_declarations_are_lenient() {
        assert_eq!(coerce(ValueType::Float, &json!("2.0")).unwrap(), ParamValue::Float(2.0));
        assert_eq!(coerce(ValueType::Float, &json!(1)).unwrap(), ParamValue::Float(1.0));
        assert_eq!(coerce(ValueType::Int, &json!(4.0)).unwrap(), ParamValue::Int(4));
        assert!(coerce(ValueType::Int, &json!(4.5)).is_err());
        assert_eq!(coerce(ValueType::Bool, &json!("on")).unwrap(), ParamValue::Bool(true));
        assert!(coerce(ValueType::Enum, &json!(3)).is_err());
    }

    #[test]
    fn test_policy_keys() {
        assert_eq!(ParamValue::Enum("box".into()).as_key(), "box");
        assert_eq!(ParamValue::Bool(true).as_key(), "true");
    }

    #[test]
    fn test_default_for_enum_is_first_limit() {
        assert_eq!(
            default_for(ValueType::Enum, &shapes()),
            Some(ParamValue::Enum("box".into()))
        );
        assert_eq!(default_for(ValueType::Font, &Constraints::default()), None);
    }
}
