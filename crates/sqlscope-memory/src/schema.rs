//! Per-model constraints enforced by the in-memory store.

use std::collections::BTreeMap;

/// Constraints for one model.
///
/// Every model gets an integer `id` primary key, auto-assigned when a create
/// does not provide one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: String,
    unique: Vec<String>,
    required: Vec<String>,
    max_length: BTreeMap<String, usize>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: Vec::new(),
            required: Vec::new(),
            max_length: BTreeMap::new(),
        }
    }

    /// Reject two rows with the same non-null value for `field`.
    #[must_use]
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Reject rows where `field` is missing or null.
    #[must_use]
    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Reject string values of `field` longer than `max` characters.
    #[must_use]
    pub fn max_length(mut self, field: impl Into<String>, max: usize) -> Self {
        self.max_length.insert(field.into(), max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.unique.iter().map(String::as_str)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn length_limits(&self) -> impl Iterator<Item = (&str, usize)> {
        self.max_length.iter().map(|(field, max)| (field.as_str(), *max))
    }
}
