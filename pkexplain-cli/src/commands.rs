//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use pkexplain_core::accuracy::{AccuracyReport, EvaluationSample, Tolerances};
use pkexplain_core::record::parse_assignment;
use pkexplain_core::schema::FeatureDomain;
use pkexplain_core::{
    AttributionResult, FeatureRecord, FeatureSchema, FeatureValue, Pipeline, PipelineConfig,
    PipelineOutput, RawInput,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    mut config: PipelineConfig,
) -> anyhow::Result<()> {
    resolve_paths(&mut config, workspace);
    match command {
        Commands::Schema { json } => handle_schema(&config, json),
        Commands::Predict {
            model,
            input,
            set,
            top,
            json,
        } => {
            if let Some(model) = model {
                config.model.path = Some(model);
            }
            if let Some(top) = top {
                config.attribution.top_n = top;
            }
            let raw = read_input(input.as_deref(), &set)?;
            handle_predict(&config, &raw, json)
        }
        Commands::Report {
            samples,
            absolute_tolerance,
            relative_tolerance,
            no_relative_tolerance,
            json,
        } => {
            apply_tolerance_flags(
                &mut config.accuracy,
                absolute_tolerance,
                relative_tolerance,
                no_relative_tolerance,
            );
            handle_report(&config, &samples, json)
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Command-line bands win over config; `--no-relative-tolerance` switches the band off.
fn apply_tolerance_flags(
    tolerances: &mut Tolerances,
    absolute_tolerance: Option<f64>,
    relative_tolerance: Option<f64>,
    no_relative_tolerance: bool,
) {
    if absolute_tolerance.is_some() {
        tolerances.absolute_tolerance = absolute_tolerance;
    }
    if no_relative_tolerance {
        tolerances.relative_tolerance = None;
    } else if relative_tolerance.is_some() {
        tolerances.relative_tolerance = relative_tolerance;
    }
}

/// Config-file paths are relative to the workspace.
fn resolve_paths(config: &mut PipelineConfig, workspace: &Path) {
    let resolve = |path: &mut Option<PathBuf>| {
        if let Some(p) = path.as_mut() {
            if p.is_relative() {
                *p = workspace.join(&*p);
            }
        }
    };
    resolve(&mut config.model.path);
    resolve(&mut config.schema.path);
}

fn load_schema(config: &PipelineConfig) -> anyhow::Result<FeatureSchema> {
    Ok(match &config.schema.path {
        Some(path) => FeatureSchema::load(path)?,
        None => FeatureSchema::concentration(),
    })
}

fn handle_schema(config: &PipelineConfig, json: bool) -> anyhow::Result<()> {
    let schema = load_schema(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
    } else {
        print!("{}", render_schema(&schema));
    }
    Ok(())
}

/// Merge the JSON input file (if any) with `NAME=VALUE` assignments; assignments win.
fn read_input(path: Option<&Path>, assignments: &[String]) -> anyhow::Result<RawInput> {
    let mut raw = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
            serde_json::from_str::<RawInput>(&content)?
        }
        None => RawInput::new(),
    };
    for assignment in assignments {
        let (name, value) = parse_assignment(assignment)?;
        raw.insert(name, value);
    }
    Ok(raw)
}

fn handle_predict(config: &PipelineConfig, raw: &RawInput, json: bool) -> anyhow::Result<()> {
    if config.model.path.is_none() {
        anyhow::bail!(
            "No model configured. Pass --model or set model.path in .pkexplain/config.toml"
        );
    }
    let pipeline = Pipeline::from_config(config)?;
    tracing::debug!(supplied = raw.len(), "Running prediction");
    let output = pipeline.run(raw)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&PredictionView::new(&pipeline, &output))?);
    } else {
        print!("{}", render_prediction(pipeline.schema(), &output, pipeline.top_n()));
    }
    Ok(())
}

fn handle_report(config: &PipelineConfig, samples: &Path, json: bool) -> anyhow::Result<()> {
    let sample = EvaluationSample::load(samples)?;
    let report = sample.report(&config.accuracy)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report, config));
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".pkexplain");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = pkexplain_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct PredictionView<'a> {
    target: &'a str,
    unit: Option<&'a str>,
    prediction: f64,
    record: &'a FeatureRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribution: Option<&'a AttributionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribution_error: Option<String>,
}

impl<'a> PredictionView<'a> {
    fn new(pipeline: &'a Pipeline, output: &'a PipelineOutput) -> Self {
        let target = pipeline.schema().target();
        Self {
            target: &target.name,
            unit: target.unit.as_deref(),
            prediction: output.prediction,
            record: &output.record,
            attribution: output.attribution.as_ref().ok(),
            attribution_error: output.attribution.as_ref().err().map(|e| e.to_string()),
        }
    }
}

fn with_unit(value: impl std::fmt::Display, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{value} {unit}"),
        None => value.to_string(),
    }
}

/// Feature value with its unit or category label, e.g. `32.5 kg` or `1 (Male)`.
fn describe_value(schema: &FeatureSchema, name: &str, value: FeatureValue) -> String {
    let Some(spec) = schema.get(name) else {
        return value.to_string();
    };
    match (&spec.domain, value) {
        (FeatureDomain::Categorical { options, .. }, FeatureValue::Categorical(code)) => options
            .iter()
            .find(|o| o.code == code && !o.label.is_empty())
            .map(|o| format!("{code} ({})", o.label))
            .unwrap_or_else(|| code.to_string()),
        _ => with_unit(value, spec.unit.as_deref()),
    }
}

fn render_schema(schema: &FeatureSchema) -> String {
    let mut out = String::new();
    let target = schema.target();
    let _ = writeln!(
        out,
        "Target: {}",
        with_unit(&target.name, target.unit.as_deref())
    );
    let _ = writeln!(out, "Fingerprint: {}\n", schema.fingerprint());
    for spec in schema.features() {
        let _ = writeln!(
            out,
            "  {:<12} {:<11} {:<8} {}",
            spec.name,
            spec.kind(),
            spec.unit.as_deref().unwrap_or("-"),
            spec.domain_summary()
        );
        if !spec.description.is_empty() {
            let _ = writeln!(out, "  {:<12} {}", "", spec.description);
        }
    }
    out
}

fn render_prediction(schema: &FeatureSchema, output: &PipelineOutput, top_n: usize) -> String {
    let mut out = String::new();
    let target = schema.target();
    let unit = target.unit.as_deref();
    let _ = writeln!(
        out,
        "Predicted {}: {}",
        target.name,
        with_unit(format!("{:.2}", output.prediction), unit)
    );

    match &output.attribution {
        Ok(attribution) => {
            let _ = writeln!(
                out,
                "\nBaseline (expected value): {}",
                with_unit(format!("{:.2}", attribution.baseline), unit)
            );
            let _ = writeln!(out, "Top {top_n} contributions:");
            for c in attribution.top_contributions(top_n) {
                let _ = writeln!(
                    out,
                    "  {:<12} {:<14} {:+.3}",
                    c.name,
                    describe_value(schema, &c.name, c.value),
                    c.contribution
                );
            }
        }
        Err(e) => {
            let _ = writeln!(out, "\nAttribution unavailable: {e}");
        }
    }
    out
}

fn render_report(report: &AccuracyReport, config: &PipelineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Samples: {}", report.n);
    let _ = writeln!(out, "MAE:     {:.4}", report.mae);
    let _ = writeln!(out, "MSE:     {:.4}", report.mse);
    let _ = writeln!(out, "RMSE:    {:.4}", report.rmse);
    let _ = writeln!(out, "R²:      {:.4}", report.r_squared);
    if let (Some(rate), Some(tol)) = (report.within_absolute, config.accuracy.absolute_tolerance) {
        let _ = writeln!(out, "Within ±{tol}: {:.1}%", rate * 100.0);
    }
    if let (Some(rate), Some(tol)) = (report.within_relative, config.accuracy.relative_tolerance) {
        let _ = writeln!(out, "Within {:.0}%: {:.1}%", tol * 100.0, rate * 100.0);
    }
    out
}
