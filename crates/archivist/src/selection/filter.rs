//! Saved filter queries over archived objects.

use serde::{Deserialize, Serialize};

use crate::model::ArchivedObject;

use super::error::SelectionError;

/// A single condition on an object field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterParameter {
    Equals { field: String, value: String },
    OneOf { field: String, values: Vec<String> },
    Exists { field: String },
}

impl FilterParameter {
    fn field(&self) -> &str {
        match self {
            FilterParameter::Equals { field, .. }
            | FilterParameter::OneOf { field, .. }
            | FilterParameter::Exists { field } => field,
        }
    }

    fn matches(&self, object: &ArchivedObject) -> bool {
        let actual = object.field(self.field());
        match self {
            FilterParameter::Equals { value, .. } => actual.as_deref() == Some(value.as_str()),
            FilterParameter::OneOf { values, .. } => {
                actual.is_some_and(|a| values.iter().any(|v| *v == a))
            }
            FilterParameter::Exists { .. } => actual.is_some(),
        }
    }
}

/// Conjunction of field conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub parameters: Vec<FilterParameter>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::all().and(FilterParameter::Equals {
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn and(mut self, parameter: FilterParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Parses `field=value` into an equality filter.
    pub fn parse_equals(expr: &str) -> Result<FilterParameter, SelectionError> {
        match expr.split_once('=') {
            Some((field, value)) if !field.trim().is_empty() => Ok(FilterParameter::Equals {
                field: field.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => Err(SelectionError::InvalidFilter(format!(
                "expected field=value, got '{}'",
                expr
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        for parameter in &self.parameters {
            if parameter.field().trim().is_empty() {
                return Err(SelectionError::InvalidFilter(
                    "filter parameter with empty field name".to_string(),
                ));
            }
            if let FilterParameter::OneOf { field, values } = parameter {
                if values.is_empty() {
                    return Err(SelectionError::InvalidFilter(format!(
                        "one_of on '{}' needs at least one value",
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, object: &ArchivedObject) -> bool {
        self.parameters.iter().all(|p| p.matches(object))
    }
}

/// A window into a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sublist {
    pub offset: u64,
    pub limit: u64,
}

impl Sublist {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}
