//! End-to-end pipeline: raw input -> canonical record -> prediction -> attribution.
//!
//! A `Pipeline` owns the schema and a shared model handle. It holds no mutable state,
//! so one instance behind an `Arc` can serve any number of threads.

use crate::accuracy::{AccuracyReport, EvaluationSample, Tolerances};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError, SchemaError};
use crate::explain::{self, AttributionResult, DEFAULT_ADDITIVITY_TOLERANCE, SamplingExplainer};
use crate::model::{ModelHandle, ModelInfo, load_model};
use crate::predict::{self, ensure_aligned};
use crate::record::{self, FeatureRecord, RawInput};
use crate::schema::FeatureSchema;
use std::sync::Arc;

/// Outcome of one full run.
///
/// Attribution failure is scoped to `attribution`; the prediction stays usable.
#[derive(Debug)]
pub struct PipelineOutput {
    pub record: FeatureRecord,
    pub prediction: f64,
    pub attribution: Result<AttributionResult, PipelineError>,
}

pub struct Pipeline {
    schema: FeatureSchema,
    fingerprint: String,
    model: ModelHandle,
    additivity_tolerance: f64,
    top_n: usize,
    tolerances: Tolerances,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("schema", &self.fingerprint)
            .field("model", &self.model.name())
            .field("additivity_tolerance", &self.additivity_tolerance)
            .field("top_n", &self.top_n)
            .finish()
    }
}

impl Pipeline {
    /// Bind a model to a schema. The model's column order must equal the schema's.
    pub fn new(schema: FeatureSchema, model: ModelHandle) -> Result<Self, PipelineError> {
        ensure_aligned(model.feature_names(), &schema.names())?;
        Ok(Self {
            fingerprint: schema.fingerprint(),
            schema,
            model,
            additivity_tolerance: DEFAULT_ADDITIVITY_TOLERANCE,
            top_n: 5,
            tolerances: Tolerances::default(),
        })
    }

    /// Apply the attribution and accuracy sections of `config`.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.additivity_tolerance = config.attribution.additivity_tolerance;
        self.top_n = config.attribution.top_n;
        self.tolerances = config.accuracy.clone();
        self
    }

    /// Load the schema and model named by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let schema = match &config.schema.path {
            Some(path) => FeatureSchema::load(path)?,
            None => FeatureSchema::concentration(),
        };
        let model_path = config.model.path.as_ref().ok_or_else(|| ConfigError::Invalid {
            key: "model.path".to_string(),
            reason: "no model artifact configured".to_string(),
        })?;
        let model = load_model(model_path)?;
        let pipeline = Self::new(schema, Arc::new(model))?.with_config(config);
        tracing::info!(
            model = pipeline.model.name(),
            schema = %pipeline.fingerprint,
            "Pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo::of(self.model.as_ref())
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    pub fn normalize(&self, raw: &RawInput) -> Result<FeatureRecord, PipelineError> {
        Ok(record::normalize(raw, &self.schema)?)
    }

    /// Records normalized against another schema are rejected even when the names agree.
    fn ensure_same_schema(&self, record: &FeatureRecord) -> Result<(), SchemaError> {
        if record.fingerprint() != self.fingerprint {
            return Err(SchemaError::FingerprintMismatch {
                expected: self.fingerprint.clone(),
                found: record.fingerprint().to_string(),
            });
        }
        Ok(())
    }

    pub fn predict(&self, record: &FeatureRecord) -> Result<f64, PipelineError> {
        self.ensure_same_schema(record)?;
        predict::predict(self.model.as_ref(), record)
    }

    pub fn explain(&self, record: &FeatureRecord) -> Result<AttributionResult, PipelineError> {
        self.ensure_same_schema(record)?;
        explain::explain_with_tolerance(self.model.as_ref(), record, self.additivity_tolerance)
    }

    /// Explain with the model-agnostic sampler instead of the exact decomposition.
    pub fn explain_sampled(
        &self,
        explainer: &SamplingExplainer,
        record: &FeatureRecord,
    ) -> Result<AttributionResult, PipelineError> {
        self.ensure_same_schema(record)?;
        explainer
            .clone()
            .with_tolerance(self.additivity_tolerance)
            .explain(self.model.as_ref(), record)
    }

    /// Normalize, predict and explain one raw input.
    pub fn run(&self, raw: &RawInput) -> Result<PipelineOutput, PipelineError> {
        let record = self.normalize(raw)?;
        let prediction = self.predict(&record)?;
        let attribution = self.explain(&record);
        if let Err(e) = &attribution {
            tracing::warn!(error = %e, "Attribution failed; returning prediction only");
        }
        Ok(PipelineOutput {
            record,
            prediction,
            attribution,
        })
    }

    pub fn evaluate(&self, sample: &EvaluationSample) -> Result<AccuracyReport, PipelineError> {
        Ok(sample.report(&self.tolerances)?)
    }
}
