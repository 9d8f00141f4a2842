//! Environment variables handed to a step's process.
//!
//! An [`Environment`] is an ordered list of variable/value pairs. Duplicates
//! are kept; composition is plain concatenation and the process environment
//! resolves repeated names (last entry wins for docker `-e`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single environment variable and its associated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub variable: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.variable, self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(pub Vec<EnvVar>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EnvVar> {
        self.0.iter()
    }

    pub fn push(&mut self, variable: impl Into<String>, value: impl Into<String>) {
        self.0.push(EnvVar::new(variable, value));
    }

    /// Job-scope entries followed by step-scope entries, order kept within each.
    pub fn compose(job: &Environment, step: &Environment) -> Environment {
        let mut vars = Vec::with_capacity(job.len() + step.len());
        vars.extend(job.iter().cloned());
        vars.extend(step.iter().cloned());
        Environment(vars)
    }

    /// `VARIABLE=VALUE` strings for the process launch boundary.
    pub fn stringify(&self) -> Vec<String> {
        self.iter().map(EnvVar::to_string).collect()
    }
}

impl From<Vec<EnvVar>> for Environment {
    fn from(vars: Vec<EnvVar>) -> Self {
        Self(vars)
    }
}

impl<'a> IntoIterator for &'a Environment {
    type Item = &'a EnvVar;
    type IntoIter = std::slice::Iter<'a, EnvVar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
