//! Declarative parameter schemas.
//!
//! A schema is an ordered list of child descriptors, the same shape scripts
//! write inline:
//!
//! ```text
//! [
//!     #{ name: "Shape", type: "list", value: "box", limits: ["box", "sphere"] },
//!     #{ name: "Width", type: "float", value: 1.0, suffix: "mm" },
//! ]
//! ```
//!
//! Descriptors deserialize with serde, from JSON or from Rhai values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ParamError, Result};
use crate::value::{Constraints, ValueType};

/// One node descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Empty for a root group; the registry name is used instead.
    #[serde(default)]
    pub name: String,
    /// `float`, `int`, `bool`, `str`, `list`/`enum`, `font` or `group`.
    /// Inferred from `children`/`value` when omitted.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySpec>,
}

/// Configuration of a conditional group policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Direct child whose value selects the visible siblings.
    pub discriminator: String,
    /// Discriminator value -> names of the children shown for it.
    pub cases: BTreeMap<String, Vec<String>>,
}

/// Node kind resolved from a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecKind {
    Group,
    Leaf(ValueType),
}

impl ValueType {
    /// Resolve a schema type name. Accepts the widget-library spellings
    /// (`str`, `list`) as well as the long ones.
    pub fn from_name(name: &str) -> Option<ValueType> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "float" | "double" | "number" => ValueType::Float,
            "int" | "integer" => ValueType::Int,
            "bool" | "boolean" => ValueType::Bool,
            "str" | "string" | "text" => ValueType::Str,
            "list" | "enum" => ValueType::Enum,
            "font" => ValueType::Font,
            _ => return None,
        };
        Some(ty)
    }
}

impl ParamSpec {
    pub fn leaf(name: impl Into<String>, ty: &str, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty.to_string()),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn group(name: impl Into<String>, children: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            ty: Some("group".to_string()),
            children,
            ..Default::default()
        }
    }

    pub fn with_limits<I, S>(mut self, limits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.limits = Some(limits.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_policy(mut self, policy: PolicySpec) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn constraints(&self) -> Constraints {
        Constraints {
            limits: self.limits.clone(),
            min: self.min,
            max: self.max,
            suffix: self.suffix.clone(),
        }
    }

    /// Resolve the node kind, inferring it when `type` is omitted.
    pub fn kind(&self, path: &str) -> Result<SpecKind> {
        match self.ty.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("group") => Ok(SpecKind::Group),
            Some(t) => ValueType::from_name(t)
                .map(SpecKind::Leaf)
                .ok_or_else(|| ParamError::constraint(path, format!("unknown parameter type {t:?}"))),
            None if !self.children.is_empty() => Ok(SpecKind::Group),
            None => match &self.value {
                Some(serde_json::Value::Bool(_)) => Ok(SpecKind::Leaf(ValueType::Bool)),
                Some(serde_json::Value::Number(_)) => Ok(SpecKind::Leaf(ValueType::Float)),
                Some(serde_json::Value::String(_)) if self.limits.is_some() => {
                    Ok(SpecKind::Leaf(ValueType::Enum))
                }
                Some(serde_json::Value::String(_)) => Ok(SpecKind::Leaf(ValueType::Str)),
                _ => Err(ParamError::constraint(path, "parameter declares no type")),
            },
        }
    }
}

impl PolicySpec {
    pub fn new(discriminator: impl Into<String>) -> Self {
        Self {
            discriminator: discriminator.into(),
            cases: BTreeMap::new(),
        }
    }

    pub fn case<I, S>(mut self, value: impl Into<String>, shown: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cases
            .insert(value.into(), shown.into_iter().map(Into::into).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_combo_schema() {
        let specs: Vec<ParamSpec> = serde_json::from_str(
            r#"[
                { "name": "Shape", "type": "list", "value": "box", "limits": ["box", "sphere"] },
                { "name": "Width", "type": "float", "value": 1.0, "suffix": "mm" }
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind("Shape").unwrap(), SpecKind::Leaf(ValueType::Enum));
        assert_eq!(specs[1].constraints().suffix.as_deref(), Some("mm"));
    }

    #[test]
    fn test_kind_inference() {
        let spec = ParamSpec {
            name: "Flag".into(),
            value: Some(json!(true)),
            ..Default::default()
        };
        assert_eq!(spec.kind("Flag").unwrap(), SpecKind::Leaf(ValueType::Bool));

        let group = ParamSpec {
            name: "Body".into(),
            children: vec![ParamSpec::leaf("H", "float", json!(1.0))],
            ..Default::default()
        };
        assert_eq!(group.kind("Body").unwrap(), SpecKind::Group);
    }

    #[test]
    fn test_unknown_type_is_constraint_violation() {
        let spec = ParamSpec::leaf("X", "colour", json!("red"));
        let err = spec.kind("X").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_group_document() {
        let group: ParamSpec = serde_json::from_str(
            r#"{ "name": "box", "children": [ { "name": "Height", "type": "float", "value": 1 } ] }"#,
        )
        .unwrap();
        assert_eq!(group.kind("box").unwrap(), SpecKind::Group);
        assert_eq!(group.children[0].name, "Height");
    }

    #[test]
    fn test_root_group_name_is_optional() {
        let group: ParamSpec =
            serde_json::from_str(r#"{ "children": [ { "name": "Height", "value": 1 } ] }"#).unwrap();
        assert!(group.name.is_empty());
        assert_eq!(group.children.len(), 1);
    }
}
