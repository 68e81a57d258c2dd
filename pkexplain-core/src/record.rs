//! Record validation and normalization.
//!
//! Turns a raw name → value mapping into a canonical, ordered, type-correct
//! [`FeatureRecord`]. Missing features are filled from their declared default; any
//! supplied value outside its domain is reported, never clamped.

use crate::error::ValidationError;
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value as supplied by a front end, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    /// Parse a command-line token: integer first, then real, otherwise text.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if let Ok(i) = token.parse::<i64>() {
            RawValue::Integer(i)
        } else if let Ok(r) = token.parse::<f64>() {
            RawValue::Real(r)
        } else {
            RawValue::Text(token.to_string())
        }
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::Integer(i64::from(v))
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Real(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// Raw input keyed by feature name. Ordered so error reporting is deterministic.
pub type RawInput = BTreeMap<String, RawValue>;

/// A validated value in model representation.
///
/// Categorical features carry their integer code; numeric features their real value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(i64),
}

impl FeatureValue {
    /// Numeric view used by tree splits.
    pub fn as_f64(&self) -> f64 {
        match self {
            FeatureValue::Numeric(v) => *v,
            FeatureValue::Categorical(c) => *c as f64,
        }
    }

    pub fn as_code(&self) -> Option<i64> {
        match self {
            FeatureValue::Categorical(c) => Some(*c),
            FeatureValue::Numeric(_) => None,
        }
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureValue::Numeric(v) => write!(f, "{v}"),
            FeatureValue::Categorical(c) => write!(f, "{c}"),
        }
    }
}

/// A canonical feature record: one value per schema column, in schema order.
///
/// Only constructible through validation, and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    fingerprint: String,
    names: Vec<String>,
    values: Vec<FeatureValue>,
}

impl FeatureRecord {
    /// The record made of every feature's declared default.
    pub fn defaults(schema: &FeatureSchema) -> Self {
        Self {
            fingerprint: schema.fingerprint(),
            names: schema.names(),
            values: schema.features().iter().map(|f| f.default_value()).collect(),
        }
    }

    /// Fingerprint of the schema this record was validated against.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FeatureValue)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Values as reals, in schema order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.values.iter().map(FeatureValue::as_f64).collect()
    }
}

/// Validate and normalize raw input against a schema.
///
/// For each feature in schema order: absent → declared default; present → checked
/// against the domain. Keys the schema does not declare are rejected.
pub fn normalize(raw: &RawInput, schema: &FeatureSchema) -> Result<FeatureRecord, ValidationError> {
    if let Some(unknown) = raw.keys().find(|k| schema.index_of(k).is_none()) {
        tracing::warn!(feature = %unknown, "Rejected unknown feature");
        return Err(ValidationError::new(unknown, "not declared in the feature schema"));
    }

    let mut values = Vec::with_capacity(schema.len());
    for spec in schema.features() {
        let value = match raw.get(&spec.name) {
            None => spec.default_value(),
            Some(raw_value) => spec.check(raw_value).inspect_err(|e| {
                tracing::warn!(feature = %e.feature, reason = %e.reason, "Rejected feature value");
            })?,
        };
        values.push(value);
    }

    Ok(FeatureRecord {
        fingerprint: schema.fingerprint(),
        names: schema.names(),
        values,
    })
}

/// Parse a `NAME=VALUE` assignment as typed on a command line.
pub fn parse_assignment(assignment: &str) -> Result<(String, RawValue), ValidationError> {
    let (name, value) = assignment.split_once('=').ok_or_else(|| {
        ValidationError::new(assignment, "expected an assignment of the form NAME=VALUE")
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new(assignment, "feature name is empty"));
    }
    Ok((name.to_string(), RawValue::parse(value)))
}
