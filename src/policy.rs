//! Conditional group policy: tagged-union presentation for parameter groups.
//!
//! A group with a policy shows only the children selected by the current
//! value of its discriminator child. Hiding never touches values; a hidden
//! parameter keeps its last value and stays readable.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ParamError, Result};
use crate::schema::PolicySpec;
use crate::value::ParamValue;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalPolicy {
    discriminator: String,
    cases: BTreeMap<String, BTreeSet<String>>,
}

impl ConditionalPolicy {
    /// Validate `spec` against the direct children of the group it attaches to.
    pub fn new(spec: &PolicySpec, group_path: &str, children: &[&str]) -> Result<Self> {
        let qualify = |name: &str| {
            if group_path.is_empty() {
                name.to_string()
            } else {
                format!("{group_path}.{name}")
            }
        };

        if !children.contains(&spec.discriminator.as_str()) {
            return Err(ParamError::not_found(qualify(&spec.discriminator)));
        }

        let mut cases = BTreeMap::new();
        for (value, shown) in &spec.cases {
            let mut set = BTreeSet::new();
            for name in shown {
                if !children.contains(&name.as_str()) {
                    return Err(ParamError::not_found(qualify(name)));
                }
                set.insert(name.clone());
            }
            cases.insert(value.clone(), set);
        }

        Ok(Self {
            discriminator: spec.discriminator.clone(),
            cases,
        })
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Visibility of every non-discriminator child for the given
    /// discriminator value. The discriminator itself is never hidden; a value
    /// without a declared case hides all other children.
    pub fn visibility<'a>(
        &self,
        value: &ParamValue,
        children: impl IntoIterator<Item = &'a str>,
    ) -> Vec<(&'a str, bool)> {
        let active = self.cases.get(&value.as_key());
        children
            .into_iter()
            .filter(|name| *name != self.discriminator)
            .map(|name| (name, active.is_some_and(|set| set.contains(name))))
            .collect()
    }
}
