//! Hyperparameter values and concrete parameter assignments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ParameterError;

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            _ => true,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A concrete parameter assignment.
///
/// Keys are fixed once the assignment is built: [`Parameters::set`] refuses
/// to introduce a key that was not sampled, so a parameter rule can only touch
/// parameters declared in its search space grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParameterValue>);

impl Parameters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a key. Only the sampler builds assignments this way.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Result<&ParameterValue, ParameterError> {
        self.0.get(key).ok_or_else(|| ParameterError::UnknownKey {
            key: key.to_string(),
        })
    }

    /// Overwrite an existing key.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<(), ParameterError> {
        match self.0.get_mut(key) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(ParameterError::UnknownKey {
                key: key.to_string(),
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ParameterError> {
        let value = self.get(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "text", value))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ParameterError> {
        let value = self.get(key)?;
        value.as_f64().ok_or_else(|| mismatch(key, "number", value))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ParameterError> {
        let value = self.get(key)?;
        value.as_i64().ok_or_else(|| mismatch(key, "int", value))
    }

    /// Typed read with a default for absent keys. A present key of the wrong
    /// type is still an error.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ParameterError> {
        match self.0.get(key) {
            Some(_) => self.get_f64(key),
            None => Ok(default),
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ParameterError> {
        match self.0.get(key) {
            Some(_) => self.get_i64(key),
            None => Ok(default),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, ParameterError> {
        match self.0.get(key) {
            Some(_) => self.get_str(key),
            None => Ok(default),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "}}")
    }
}

fn mismatch(key: &str, expected: &'static str, value: &ParameterValue) -> ParameterError {
    ParameterError::TypeMismatch {
        key: key.to_string(),
        expected,
        got: value.kind().to_string(),
    }
}
