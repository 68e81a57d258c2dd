//! Feature schema: the ordered, declarative table of model input columns.
//!
//! The schema is the single source of truth for the domain limits shown to a caller,
//! the column order passed to the model, and which features are categorical.
//!
//! ## Rules (never break these once a model is bound):
//! 1. Column order is fixed; the model was trained on exactly this order.
//! 2. Adding, removing or reordering a feature changes the fingerprint.

use crate::error::{SchemaError, ValidationError};
use crate::record::{FeatureValue, RawValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Kind of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureKind::Numeric => write!(f, "numeric"),
            FeatureKind::Categorical => write!(f, "categorical"),
        }
    }
}

/// One admissible category: the integer code the model sees and a display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOption {
    pub code: i64,
    #[serde(default)]
    pub label: String,
}

impl CategoryOption {
    pub fn new(code: i64, label: &str) -> Self {
        Self {
            code,
            label: label.to_string(),
        }
    }
}

/// Value domain of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureDomain {
    /// Closed real interval `[min, max]`.
    Numeric { min: f64, max: f64, default: f64 },
    /// Finite set of integer codes.
    Categorical {
        options: Vec<CategoryOption>,
        default: i64,
    },
}

/// Definition of a single model input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub domain: FeatureDomain,
}

impl FeatureSpec {
    pub fn numeric(name: &str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            unit: None,
            domain: FeatureDomain::Numeric { min, max, default },
        }
    }

    pub fn categorical(name: &str, options: Vec<CategoryOption>, default: i64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            unit: None,
            domain: FeatureDomain::Categorical { options, default },
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn kind(&self) -> FeatureKind {
        match self.domain {
            FeatureDomain::Numeric { .. } => FeatureKind::Numeric,
            FeatureDomain::Categorical { .. } => FeatureKind::Categorical,
        }
    }

    /// The declared default, already in model representation.
    pub fn default_value(&self) -> FeatureValue {
        match &self.domain {
            FeatureDomain::Numeric { default, .. } => FeatureValue::Numeric(*default),
            FeatureDomain::Categorical { default, .. } => FeatureValue::Categorical(*default),
        }
    }

    /// Domain predicate.
    pub fn valid(&self, value: &RawValue) -> bool {
        self.check(value).is_ok()
    }

    /// Check a raw value against this feature's domain and convert it to model
    /// representation. Never clamps.
    pub fn check(&self, value: &RawValue) -> Result<FeatureValue, ValidationError> {
        match &self.domain {
            FeatureDomain::Numeric { min, max, .. } => {
                let v = match value {
                    RawValue::Integer(i) => *i as f64,
                    RawValue::Real(r) if r.is_finite() => *r,
                    RawValue::Real(r) => {
                        return Err(ValidationError::new(
                            &self.name,
                            format!("{r} is not a finite number"),
                        ));
                    }
                    RawValue::Text(t) => {
                        return Err(ValidationError::new(
                            &self.name,
                            format!("expected a number, got text '{t}'"),
                        ));
                    }
                };
                if v < *min || v > *max {
                    return Err(ValidationError::new(
                        &self.name,
                        format!("{v} is outside [{min}, {max}]"),
                    ));
                }
                Ok(FeatureValue::Numeric(v))
            }
            FeatureDomain::Categorical { options, .. } => {
                let code = match value {
                    RawValue::Integer(i) => *i,
                    RawValue::Real(r) if is_integral(*r) => *r as i64,
                    RawValue::Real(r) => {
                        return Err(ValidationError::new(
                            &self.name,
                            format!("expected an integer category code, got {r}"),
                        ));
                    }
                    RawValue::Text(t) => {
                        return Err(ValidationError::new(
                            &self.name,
                            format!("expected an integer category code, got text '{t}'"),
                        ));
                    }
                };
                if !options.iter().any(|o| o.code == code) {
                    let codes: Vec<String> = options.iter().map(|o| o.code.to_string()).collect();
                    return Err(ValidationError::new(
                        &self.name,
                        format!("{code} is not one of {{{}}}", codes.join(", ")),
                    ));
                }
                Ok(FeatureValue::Categorical(code))
            }
        }
    }

    /// Human-readable domain, e.g. `[0, 18] (default 5)`.
    pub fn domain_summary(&self) -> String {
        match &self.domain {
            FeatureDomain::Numeric { min, max, default } => {
                format!("[{min}, {max}] (default {default})")
            }
            FeatureDomain::Categorical { options, default } => {
                let items: Vec<String> = options
                    .iter()
                    .map(|o| {
                        if o.label.is_empty() {
                            o.code.to_string()
                        } else {
                            format!("{} = {}", o.code, o.label)
                        }
                    })
                    .collect();
                format!("{{{}}} (default {default})", items.join(", "))
            }
        }
    }

    fn validate_definition(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidDomain {
            feature: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("feature name is empty".to_string()));
        }
        match &self.domain {
            FeatureDomain::Numeric { min, max, default } => {
                if !(min.is_finite() && max.is_finite() && default.is_finite()) {
                    return Err(invalid("bounds and default must be finite".to_string()));
                }
                if min > max {
                    return Err(invalid(format!("min {min} exceeds max {max}")));
                }
                if default < min || default > max {
                    return Err(invalid(format!(
                        "default {default} is outside [{min}, {max}]"
                    )));
                }
            }
            FeatureDomain::Categorical { options, default } => {
                if options.is_empty() {
                    return Err(invalid("no category options declared".to_string()));
                }
                let mut seen = HashSet::new();
                for option in options {
                    if !seen.insert(option.code) {
                        return Err(invalid(format!("duplicate category code {}", option.code)));
                    }
                }
                if !seen.contains(default) {
                    return Err(invalid(format!("default {default} is not a declared option")));
                }
            }
        }
        Ok(())
    }
}

fn is_integral(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64
}

/// The quantity the model predicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            name: "concentration".to_string(),
            unit: Some("mg/L".to_string()),
        }
    }
}

/// On-disk form of a schema, validated into a [`FeatureSchema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    target: TargetSpec,
    features: Vec<FeatureSpec>,
}

/// Ordered table of feature definitions. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDocument", into = "SchemaDocument")]
pub struct FeatureSchema {
    target: TargetSpec,
    features: Vec<FeatureSpec>,
}

impl TryFrom<SchemaDocument> for FeatureSchema {
    type Error = SchemaError;

    fn try_from(doc: SchemaDocument) -> Result<Self, Self::Error> {
        Self::new(doc.target, doc.features)
    }
}

impl From<FeatureSchema> for SchemaDocument {
    fn from(schema: FeatureSchema) -> Self {
        Self {
            target: schema.target,
            features: schema.features,
        }
    }
}

impl FeatureSchema {
    /// Build a schema, checking every per-feature invariant and name uniqueness.
    pub fn new(target: TargetSpec, features: Vec<FeatureSpec>) -> Result<Self, SchemaError> {
        if features.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut names = HashSet::new();
        for spec in &features {
            spec.validate_definition()?;
            if !names.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateFeature {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self { target, features })
    }

    /// The paediatric concentration schema the shipped model was trained on.
    pub fn concentration() -> Self {
        // Units for SCR, CLCR, BUN and CL are unconfirmed against the training data.
        let features = vec![
            FeatureSpec::categorical(
                "SEX",
                vec![CategoryOption::new(0, "Female"), CategoryOption::new(1, "Male")],
                0,
            )
            .with_description("Gender of the patient"),
            FeatureSpec::numeric("AGE", 0.0, 18.0, 5.0)
                .with_unit("years")
                .with_description("Age of the patient"),
            FeatureSpec::numeric("WT", 0.0, 100.0, 25.0)
                .with_unit("kg")
                .with_description("Weight of the patient"),
            FeatureSpec::numeric("Single_Dose", 0.0, 60.0, 15.0)
                .with_unit("mg/kg")
                .with_description("Single dose of the drug per weight"),
            FeatureSpec::numeric("Daily_Dose", 0.0, 2400.0, 450.0)
                .with_unit("mg")
                .with_description("Total daily dose of the drug"),
            FeatureSpec::numeric("SCR", 0.0, 150.0, 30.0)
                .with_unit("mg/dL")
                .with_description("Serum creatinine level"),
            FeatureSpec::numeric("CLCR", 0.0, 200.0, 90.0)
                .with_unit("mL/min")
                .with_description("Creatinine clearance rate"),
            FeatureSpec::numeric("BUN", 0.0, 50.0, 5.0)
                .with_unit("mg/dL")
                .with_description("Blood urea nitrogen level"),
            FeatureSpec::numeric("ALT", 0.0, 150.0, 18.0)
                .with_unit("U/L")
                .with_description("Alanine aminotransferase level"),
            FeatureSpec::numeric("AST", 0.0, 150.0, 18.0)
                .with_unit("U/L")
                .with_description("Aspartate transaminase level"),
            FeatureSpec::numeric("CL", 0.0, 100.0, 3.85)
                .with_unit("mL/min")
                .with_description("Metabolic clearance rate of the drug"),
            FeatureSpec::numeric("V", 0.0, 1000.0, 10.0)
                .with_unit("L")
                .with_description("Apparent volume of distribution of the drug"),
        ];
        Self {
            target: TargetSpec::default(),
            features,
        }
    }

    /// Load a schema from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let parse_err = |message: String| SchemaError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| parse_err(e.to_string()))?;
        let doc: SchemaDocument = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };
        let schema = Self::try_from(doc)?;
        tracing::info!(
            path = %path.display(),
            features = schema.len(),
            "Loaded feature schema"
        );
        Ok(schema)
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Column names in model order.
    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Names of the categorical columns, in schema order.
    pub fn categorical_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.kind() == FeatureKind::Categorical)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// SHA-256 over the ordered names and kinds. Any reorder changes it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for spec in &self.features {
            hasher.update(spec.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(spec.kind().to_string().as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::concentration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concentration_schema_order() {
        let schema = FeatureSchema::concentration();
        assert_eq!(
            schema.names(),
            vec![
                "SEX",
                "AGE",
                "WT",
                "Single_Dose",
                "Daily_Dose",
                "SCR",
                "CLCR",
                "BUN",
                "ALT",
                "AST",
                "CL",
                "V"
            ]
        );
        assert_eq!(schema.categorical_features(), vec!["SEX"]);
        assert_eq!(schema.index_of("CL"), Some(10));
        assert_eq!(schema.index_of("nonexistent"), None);
    }

    #[test]
    fn test_builtin_schema_passes_its_own_checks() {
        let builtin = FeatureSchema::concentration();
        let rebuilt = FeatureSchema::new(builtin.target().clone(), builtin.features().to_vec());
        assert_eq!(rebuilt, Ok(builtin));
    }

    #[test]
    fn test_age_boundaries() {
        let schema = FeatureSchema::concentration();
        let age = schema.get("AGE").unwrap();
        assert!(age.valid(&RawValue::Real(18.0)));
        assert!(age.valid(&RawValue::Integer(0)));
        assert!(!age.valid(&RawValue::Integer(-1)));
        assert!(!age.valid(&RawValue::Integer(19)));
        assert!(!age.valid(&RawValue::Real(f64::NAN)));
        assert!(!age.valid(&RawValue::Text("five".into())));
    }

    #[test]
    fn test_categorical_check_coerces_integral_reals() {
        let schema = FeatureSchema::concentration();
        let sex = schema.get("SEX").unwrap();
        assert_eq!(
            sex.check(&RawValue::Real(1.0)),
            Ok(FeatureValue::Categorical(1))
        );
        assert!(sex.check(&RawValue::Real(0.5)).is_err());
        let err = sex.check(&RawValue::Integer(2)).unwrap_err();
        assert_eq!(err.feature, "SEX");
        assert_eq!(err.reason, "2 is not one of {0, 1}");
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let result = FeatureSchema::new(
            TargetSpec::default(),
            vec![
                FeatureSpec::numeric("AGE", 0.0, 18.0, 5.0),
                FeatureSpec::numeric("AGE", 0.0, 18.0, 5.0),
            ],
        );
        assert_eq!(
            result,
            Err(SchemaError::DuplicateFeature { name: "AGE".into() })
        );
    }

    #[test]
    fn test_default_outside_range_rejected() {
        let result = FeatureSchema::new(
            TargetSpec::default(),
            vec![FeatureSpec::numeric("WT", 0.0, 100.0, 120.0)],
        );
        assert!(matches!(result, Err(SchemaError::InvalidDomain { .. })));
    }

    #[test]
    fn test_categorical_default_must_be_option() {
        let result = FeatureSchema::new(
            TargetSpec::default(),
            vec![FeatureSpec::categorical(
                "SEX",
                vec![CategoryOption::new(0, "Female")],
                1,
            )],
        );
        assert!(matches!(result, Err(SchemaError::InvalidDomain { .. })));
    }

    #[test]
    fn test_empty_schema_rejected() {
        assert_eq!(
            FeatureSchema::new(TargetSpec::default(), Vec::new()),
            Err(SchemaError::Empty)
        );
    }

    #[test]
    fn test_fingerprint_tracks_order() {
        let a = FeatureSchema::new(
            TargetSpec::default(),
            vec![
                FeatureSpec::numeric("AGE", 0.0, 18.0, 5.0),
                FeatureSpec::numeric("WT", 0.0, 100.0, 25.0),
            ],
        )
        .unwrap();
        let b = FeatureSchema::new(
            TargetSpec::default(),
            vec![
                FeatureSpec::numeric("WT", 0.0, 100.0, 25.0),
                FeatureSpec::numeric("AGE", 0.0, 18.0, 5.0),
            ],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_domain_summary() {
        let schema = FeatureSchema::concentration();
        assert_eq!(
            schema.get("AGE").unwrap().domain_summary(),
            "[0, 18] (default 5)"
        );
        assert_eq!(
            schema.get("SEX").unwrap().domain_summary(),
            "{0 = Female, 1 = Male} (default 0)"
        );
    }

    #[test]
    fn test_load_schema_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.toml");
        std::fs::write(
            &path,
            r#"
[target]
name = "concentration"
unit = "mg/L"

[[features]]
name = "SEX"
kind = "categorical"
default = 0
options = [{ code = 0, label = "Female" }, { code = 1, label = "Male" }]

[[features]]
name = "AGE"
kind = "numeric"
unit = "years"
min = 0.0
max = 18.0
default = 5.0
"#,
        )
        .unwrap();

        let schema = FeatureSchema::load(&path).unwrap();
        assert_eq!(schema.names(), vec!["SEX", "AGE"]);
        assert_eq!(schema.get("AGE").unwrap().unit.as_deref(), Some("years"));
        assert_eq!(schema.get("SEX").unwrap().kind(), FeatureKind::Categorical);
    }

    #[test]
    fn test_load_schema_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"features": [{"name": "AGE", "kind": "numeric", "min": 10.0, "max": 0.0, "default": 5.0}]}"#,
        )
        .unwrap();
        assert!(matches!(
            FeatureSchema::load(&path),
            Err(SchemaError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn test_load_schema_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.toml");
        std::fs::write(&path, "features = 3").unwrap();
        assert!(matches!(
            FeatureSchema::load(&path),
            Err(SchemaError::Parse { .. })
        ));
    }
}
