//! GxP Audit Validator CLI Module
//!
//! Command-line interface for inspecting audit-trail exports and running
//! the anomaly review.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::anomaly::AnomalyLabel;
use crate::audit::{AuditSink, FileAuditLog, DEFAULT_AUDIT_LOG};
use crate::explainability::AttributionOutcome;
use crate::export::{JsonModelStore, ModelSink};
use crate::pipeline::{PipelineConfig, PipelineOutput, PipelineRunner, ReviewSink, DEFAULT_OUTPUT_FILE};
use crate::preprocessing::FeatureSelector;
use crate::table::RecordTable;
use crate::utils::{DataLoader, DataSaver};
use crate::validation::ValidationOutcome;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn alert(s: &str) -> ColoredString  { s.truecolor(240, 110, 100) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn step_warn(msg: &str) {
    println!("  {} {}", "!".yellow(), msg.yellow());
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gxp-audit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Anomaly review of GxP audit-trail exports")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the schema and a preview of an audit-trail export
    Inspect {
        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Rows to preview
        #[arg(long, default_value = "5")]
        rows: usize,
    },

    /// Detect anomalies, validate them and explain the result
    Run(RunArgs),
}

/// Arguments of the `run` command; unset flags fall back to the config file
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Input CSV file
    #[arg(short, long)]
    pub data: PathBuf,

    /// Comma-separated feature columns (default: every numeric column)
    #[arg(short, long, value_delimiter = ',')]
    pub features: Option<Vec<String>>,

    /// Comma-separated numeric columns never used as features
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Expected proportion of anomalies, in (0, 0.5]
    #[arg(short, long)]
    pub contamination: Option<f64>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of isolation trees
    #[arg(long)]
    pub trees: Option<usize>,

    /// Maximum rows sampled per tree
    #[arg(long)]
    pub max_samples: Option<usize>,

    /// Leading rows to attribute
    #[arg(long)]
    pub explain_rows: Option<usize>,

    /// JSON pipeline configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Annotated CSV output
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    /// Persist the fitted model
    #[arg(long)]
    pub save_model: bool,

    /// Directory for the saved model
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,

    /// Audit log file
    #[arg(long, default_value = DEFAULT_AUDIT_LOG)]
    pub audit_log: PathBuf,

    /// Anomalous rows shown in the review
    #[arg(long, default_value = "20")]
    pub show: usize,
}

impl RunArgs {
    /// Pipeline configuration from the config file, overridden by flags
    pub fn pipeline_config(&self) -> crate::error::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(features) = &self.features {
            config = config.with_features(features.iter().map(|f| f.trim().to_string()));
        }
        if let Some(c) = self.contamination {
            config = config.with_contamination(c);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(trees) = self.trees {
            config = config.with_n_estimators(trees);
        }
        if let Some(max_samples) = self.max_samples {
            config = config.with_max_samples(max_samples);
        }
        if let Some(rows) = self.explain_rows {
            config = config.with_attribution_rows(rows);
        }

        config.validate()?;
        Ok(config)
    }

    /// Feature selector with the `--exclude` columns left out
    pub fn feature_selector(&self) -> FeatureSelector {
        self.exclude
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .fold(FeatureSelector::new(), |selector, c| selector.with_excluded(c))
    }
}

// ─── Review ────────────────────────────────────────────────────────────────────

/// Count and mean of one column within one class of rows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub count: usize,
    pub mean: Option<f64>,
}

/// Stats of `values` over the rows whose label equals `class`
pub fn class_stats(values: &[Option<f64>], labels: &[AnomalyLabel], class: AnomalyLabel) -> ClassStats {
    let selected: Vec<f64> = values
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l == class)
        .filter_map(|(v, _)| *v)
        .collect();
    let count = labels.iter().filter(|l| **l == class).count();
    let mean = if selected.is_empty() {
        None
    } else {
        Some(selected.iter().sum::<f64>() / selected.len() as f64)
    };
    ClassStats { count, mean }
}

/// Prints detected anomalies and a temperature / pH summary to stdout
#[derive(Debug, Clone)]
pub struct ConsoleReview {
    /// Anomalous rows printed
    pub max_rows: usize,
}

impl Default for ConsoleReview {
    fn default() -> Self {
        Self { max_rows: 20 }
    }
}

impl ConsoleReview {
    fn print_summary(&self, table: &RecordTable, labels: &[AnomalyLabel]) -> crate::error::Result<()> {
        let temp = table.numeric_values("Temp_C")?;
        let ph = table.numeric_values("pH")?;

        section("Temperature vs pH");
        println!(
            "  {:<10} {:>7} {:>10} {:>10}",
            muted("Class"),
            muted("Rows"),
            muted("Temp_C"),
            muted("pH")
        );
        println!("  {}", dim(&"─".repeat(40)));
        for class in [AnomalyLabel::Normal, AnomalyLabel::Anomaly] {
            let t = class_stats(&temp, labels, class);
            let p = class_stats(&ph, labels, class);
            let fmt = |m: Option<f64>| m.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
            println!(
                "  {:<10} {:>7} {:>10} {:>10}",
                class.to_string(),
                t.count,
                fmt(t.mean),
                fmt(p.mean)
            );
        }

        if let Some(truth) = table.ground_truth()? {
            let injected = truth.iter().filter(|&&t| t).count();
            println!();
            println!(
                "  {:<16} {}   {:<16} {}",
                muted("Injected"),
                injected,
                muted("Regular"),
                truth.len() - injected
            );
        }
        Ok(())
    }
}

impl ReviewSink for ConsoleReview {
    fn review(&self, table: &RecordTable, labels: &[AnomalyLabel]) {
        let mask: Vec<bool> = labels.iter().map(|l| l.is_anomaly()).collect();
        section("Detected Anomalies");
        match table.filter_rows(&mask) {
            Ok(rows) if rows.height() == 0 => println!("  {}", muted("none")),
            Ok(rows) => {
                println!("{}", rows.head(Some(self.max_rows)));
                if rows.height() > self.max_rows {
                    println!("  {}", dim(&format!("… {} more", rows.height() - self.max_rows)));
                }
            }
            Err(e) => step_warn(&format!("Could not list anomalies: {}", e)),
        }

        if table.has_column("Temp_C") && table.has_column("pH") {
            if let Err(e) = self.print_summary(table, labels) {
                step_warn(&format!("Could not summarize Temp_C / pH: {}", e));
            }
        }
    }
}

fn print_report(output: &PipelineOutput) {
    section("Validation");
    match &output.validation {
        ValidationOutcome::Report(report) => {
            println!("  {:<24} {}", muted("Injected anomalies"), report.total_labeled_anomalies);
            println!("  {:<24} {}", muted("Correctly detected"), report.correctly_detected);
            println!(
                "  {:<24} {}",
                muted("Recall"),
                format!("{:.2}%", report.recall_percent).white().bold()
            );
        }
        ValidationOutcome::NotApplicable => {
            println!("  {}", muted("no InjectedAnomaly column; validation not applicable"));
        }
    }

    section("Feature Impact");
    match &output.attribution {
        AttributionOutcome::Available(summary) => {
            println!(
                "  {}",
                dim(&format!("mean |contribution| over the first {} rows", summary.matrix.nrows()))
            );
            let ranking = summary.feature_ranking();
            let top = ranking.first().map(|r| r.mean_abs_contribution).unwrap_or(0.0);
            for rank in &ranking {
                let width = if top > 0.0 {
                    ((rank.mean_abs_contribution / top) * 30.0).round() as usize
                } else {
                    0
                };
                println!(
                    "  {:<20} {:>10.5} {}",
                    rank.feature_name,
                    rank.mean_abs_contribution,
                    accent(&"█".repeat(width))
                );
            }

            let flagged: Vec<_> = summary
                .matrix
                .explanations()
                .into_iter()
                .filter(|e| output.labels.get(e.instance_index).is_some_and(|l| l.is_anomaly()))
                .collect();
            if !flagged.is_empty() {
                println!();
                println!("  {}", dim("strongest contributor per flagged row"));
                for explanation in flagged.iter().take(10) {
                    if let Some(top) = explanation.top_k_contributors(1).first() {
                        println!(
                            "  {:<8} {:<20} {:>10.5}",
                            format!("row {}", explanation.instance_index),
                            top.feature_name,
                            top.contribution
                        );
                    }
                }
            }
        }
        AttributionOutcome::Unavailable { reason } => {
            step_warn(&format!("Feature attribution unavailable: {}", reason));
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_inspect(data_path: &Path, preview_rows: usize) -> anyhow::Result<()> {
    section("Inspect");

    let table = DataLoader::new().load_csv(data_path)?;
    let candidates = FeatureSelector::new().candidate_features(&table);

    println!("  {:<12} {}", muted("File"), data_path.display());
    println!("  {:<12} {}", muted("Rows"), table.height());
    println!("  {:<12} {}", muted("Columns"), table.width());
    println!();

    println!("  {:<24} {:<10} {:>6} {:>10}", muted("Column"), muted("Kind"), muted("Nulls"), muted("Feature"));
    println!("  {}", dim(&"─".repeat(54)));
    for column in table.schema() {
        let nulls = table
            .frame()
            .column(&column.name)
            .map(|c| c.null_count())
            .unwrap_or(0);
        let feature = if candidates.contains(&column.name) { ok("yes") } else { dim("no") };
        println!(
            "  {:<24} {:<10} {:>6} {:>10}",
            column.name,
            column.kind.to_string().truecolor(140, 140, 140),
            nulls,
            feature
        );
    }

    println!();
    println!("{}", table.head(preview_rows));
    println!();
    Ok(())
}

pub fn cmd_run(args: &RunArgs) -> anyhow::Result<()> {
    section("Audit Review");

    let audit: Arc<dyn AuditSink> = Arc::new(FileAuditLog::new(&args.audit_log));
    let config = args.pipeline_config()?;

    step_run("Reading data");
    let bytes = match std::fs::read(&args.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            audit.record(&format!("Upload error: {}", e));
            return Err(e.into());
        }
    };
    step_done(&format!("{} bytes", bytes.len()));

    step_run("Running pipeline");
    let start = Instant::now();
    let runner = PipelineRunner::new(config)
        .with_selector(args.feature_selector())
        .with_audit_sink(Arc::clone(&audit));
    let output = match runner.run_bytes(&DataLoader::new(), &bytes) {
        Ok(output) => output,
        Err(e) => {
            println!("{}", alert("failed"));
            return Err(e.into());
        }
    };
    step_done(&format!("{:?}", start.elapsed()));

    step_ok(&format!(
        "{} of {} rows flagged ({:.1}%) using {}",
        output.n_anomalies.to_string().white().bold(),
        output.table.height(),
        output.anomaly_rate() * 100.0,
        output.feature_names.join(", ")
    ));

    ConsoleReview { max_rows: args.show }.review(&output.table, &output.labels);
    print_report(&output);

    println!();
    step_run(&format!("Saving → {}", args.output.display()));
    DataSaver::save_csv(&output.table, &args.output)?;
    audit.record("Annotated output downloaded");
    step_done(&format!("{} rows × {} cols", output.table.height(), output.table.width()));

    if args.save_model {
        step_run("Saving model");
        let path = JsonModelStore::new(&args.model_dir).save(&output.model, &output.model_metadata())?;
        audit.record("Model saved");
        step_done(&path.display().to_string());
    }

    println!();
    Ok(())
}
