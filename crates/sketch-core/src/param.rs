//! Named scalar parameters referenced by field expressions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::expr::{self, ExpressionError};

/// Failure while mutating the parameter table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("invalid parameter name: {0:?}")]
    InvalidName(String),
    #[error("unknown parameter: {0}")]
    Unknown(String),
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parameter table: `name -> f64`, with expression evaluation.
///
/// Iteration order is name order, which keeps every derived computation
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterRegistry {
    params: BTreeMap<String, f64>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or create) a parameter.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        if !is_valid_name(name) {
            return Err(ParameterError::InvalidName(name.to_string()));
        }
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.params.get(name).copied()
    }

    /// Remove a parameter. Removing an unknown name is a no-op.
    pub fn remove(&mut self, name: &str) {
        self.params.remove(name);
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), ParameterError> {
        if !is_valid_name(new) {
            return Err(ParameterError::InvalidName(new.to_string()));
        }
        let value = self
            .params
            .remove(old)
            .ok_or_else(|| ParameterError::Unknown(old.to_string()))?;
        self.params.insert(new.to_string(), value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.params.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Evaluate an expression against the current table.
    pub fn eval(&self, expression: &str) -> Result<f64, ExpressionError> {
        expr::evaluate(expression, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn set_and_eval() {
        let mut reg = ParameterRegistry::new();
        reg.set("crank", 25.0).unwrap();
        reg.set("ratio", 0.5).unwrap();
        assert_relative_eq!(reg.eval("crank * ratio").unwrap(), 12.5);
    }

    #[test]
    fn name_validation() {
        let mut reg = ParameterRegistry::new();
        assert!(reg.set("1bad", 0.0).is_err());
        assert!(reg.set("", 0.0).is_err());
        assert!(reg.set("with space", 0.0).is_err());
        assert!(reg.set("_ok_2", 1.0).is_ok());
    }

    #[test]
    fn rename_keeps_value() {
        let mut reg = ParameterRegistry::new();
        reg.set("a", 4.0).unwrap();
        reg.rename("a", "b").unwrap();
        assert_eq!(reg.get("a"), None);
        assert_relative_eq!(reg.get("b").unwrap(), 4.0);
        assert!(reg.rename("missing", "c").is_err());
    }
}
