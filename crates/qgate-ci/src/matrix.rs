//! Matrix expansion.
//!
//! Expands a set of ordered axes into the cross-product of concrete
//! configurations. The first axis varies slowest.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QgateError, QgateResult};

/// Name of the toolchain-channel axis.
pub const TOOLCHAIN_AXIS: &str = "toolchain";

/// One matrix axis: a name and its ordered, distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

impl Axis {
    /// Create an axis. Repeated values are dropped, first occurrence wins.
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut distinct: Vec<String> = Vec::new();
        for value in values {
            let value = value.into();
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        Self {
            name: name.into(),
            values: distinct,
        }
    }
}

/// Ordered set of axes; immutable once a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxes {
    axes: Vec<Axis>,
}

impl MatrixAxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axes with a single toolchain axis, or no axes at all if `toolchains`
    /// is empty.
    pub fn toolchains<I, S>(toolchains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let axis = Axis::new(TOOLCHAIN_AXIS, toolchains);
        if axis.values.is_empty() {
            Self::new()
        } else {
            Self { axes: vec![axis] }
        }
    }

    /// Append an axis, or replace the values of an existing axis of the same name.
    pub fn with_axis<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let axis = Axis::new(name, values);
        match self.axes.iter_mut().find(|a| a.name == axis.name) {
            Some(existing) => *existing = axis,
            None => self.axes.push(axis),
        }
        self
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Reject axes that would expand to zero configurations or carry blank values.
    pub fn validate(&self) -> QgateResult<()> {
        for axis in &self.axes {
            if axis.name.trim().is_empty() {
                return Err(QgateError::config("matrix axis with empty name"));
            }
            if axis.values.is_empty() {
                return Err(QgateError::config(format!(
                    "matrix axis '{}' has no values",
                    axis.name
                )));
            }
            if axis.values.iter().any(|v| v.trim().is_empty()) {
                return Err(QgateError::config(format!(
                    "matrix axis '{}' has a blank value",
                    axis.name
                )));
            }
        }
        Ok(())
    }
}

/// One selected value per axis. Identifies a single pipeline execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    values: Vec<(String, String)>,
}

impl Configuration {
    /// The unparameterized configuration ("run once").
    pub fn empty() -> Self {
        Self::default()
    }

    fn with(&self, axis: &str, value: &str) -> Self {
        let mut values = self.values.clone();
        values.push((axis.to_string(), value.to_string()));
        Self { values }
    }

    /// Value selected for `axis`, if the configuration carries it.
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    pub fn toolchain(&self) -> Option<&str> {
        self.get(TOOLCHAIN_AXIS)
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "default");
        }
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(axis, value)| format!("{}={}", axis, value))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Cross-product expander for matrix axes.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand `axes` into every combination, outer axis varying slowest.
    ///
    /// No axes yields exactly one empty configuration.
    pub fn expand(axes: &MatrixAxes) -> Vec<Configuration> {
        let mut configurations = vec![Configuration::empty()];
        for axis in axes.axes() {
            configurations = configurations
                .iter()
                .flat_map(|base| axis.values.iter().map(move |v| base.with(&axis.name, v)))
                .collect();
        }
        configurations
    }
}
