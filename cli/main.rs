#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

use riskwatch::config::PipelineConfig;
use riskwatch::features::snapshot::SnapshotDiagnostics;
use riskwatch::model::metrics::EvaluationMetrics;
use riskwatch::source::CsvSource;
use riskwatch::{PipelineError, RiskPipeline};

const DEFAULT_MODEL_PATH: &str = "riskwatch_model.toml";

#[derive(Args)]
pub struct DataArgs {
    /// Observation CSV with patient_id,date,deterioration_90d and channel columns
    #[arg(value_name = "OBSERVATIONS")]
    pub observations: PathBuf,

    /// Event CSV with patient_id,event_date,event_type columns
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// Demographic CSV with patient_id and per-patient attributes
    #[arg(value_name = "DEMOGRAPHICS")]
    pub demographics: PathBuf,

    /// Pipeline configuration (.toml); every field has a default
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Where to write the trained model bundle
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub out: PathBuf,

    /// Trailing rows per patient used for the snapshot (defaults to the configured value)
    #[arg(long)]
    pub lookback_days: Option<usize>,
}

#[derive(Args)]
pub struct ModelArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Trained model bundle (.toml); when omitted a model is trained in-process
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Args)]
pub struct PredictArgs {
    #[command(flatten)]
    pub inputs: ModelArgs,

    /// Patient to score
    #[arg(long)]
    pub patient: String,
}

#[derive(Args)]
pub struct CohortArgs {
    #[command(flatten)]
    pub inputs: ModelArgs,

    /// Risk at or above which a patient counts as flagged
    #[arg(long, default_value = "0.3")]
    pub threshold: f64,
}

#[derive(Parser)]
#[command(
    name = "riskwatch",
    about = "90-day deterioration risk from longitudinal clinical records",
    long_about = "Engineers temporal features from per-patient clinical time series, trains and \
                 selects a risk classifier, and reports explained predictions with recommendations."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train and select a model from the input tables
    #[command(about = "Train a risk model (outputs: riskwatch_model.toml)")]
    Train(TrainArgs),

    /// Score one patient
    #[command(about = "Predict one patient's risk with explanations and recommendations")]
    Predict(PredictArgs),

    /// Score every patient and summarise the population
    #[command(about = "Summarise risk across the cohort")]
    Cohort(CohortArgs),

    /// Show held-out performance and diagnostics of the model
    #[command(about = "Report model performance and interpretation")]
    Report(ModelArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

#[derive(Serialize)]
struct TrainOutput<'a> {
    model: &'a str,
    metrics: EvaluationMetrics,
    snapshot: SnapshotDiagnostics,
    saved_to: PathBuf,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => log::error!("Could not render output as JSON: {e}"),
    }
}

/// Loads the configuration and tables and runs preprocessing.
fn open_pipeline(data: &DataArgs) -> Result<RiskPipeline, PipelineError> {
    let config = match &data.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let mut pipeline = RiskPipeline::new(config)?;
    let (observations, events, demographics) =
        CsvSource::new(&data.observations, &data.events, &data.demographics).load()?;
    pipeline.load(observations, events, demographics)?;
    pipeline.preprocess()?;
    Ok(pipeline)
}

fn fit(
    pipeline: &mut RiskPipeline,
    lookback_days: usize,
) -> Result<(EvaluationMetrics, SnapshotDiagnostics), PipelineError> {
    let (snapshot, diagnostics) = pipeline.build_snapshot(lookback_days)?;
    let training = &pipeline.config().training;
    let (test_fraction, seed) = (training.test_fraction, training.seed);
    let metrics = pipeline.train(&snapshot, test_fraction, seed)?.metrics.clone();
    Ok((metrics, diagnostics))
}

/// A preprocessed pipeline with a model, loaded from disk or trained on the spot.
fn ready_pipeline(inputs: &ModelArgs) -> Result<RiskPipeline, PipelineError> {
    let mut pipeline = open_pipeline(&inputs.data)?;
    match &inputs.model {
        Some(path) => pipeline.load_model(path)?,
        None => {
            log::info!("No --model given; training a model on the supplied data");
            let lookback = pipeline.config().snapshot.lookback_days;
            fit(&mut pipeline, lookback)?;
        }
    }
    Ok(pipeline)
}

fn train(args: TrainArgs) -> Result<(), PipelineError> {
    let mut pipeline = open_pipeline(&args.data)?;
    let lookback = args
        .lookback_days
        .unwrap_or(pipeline.config().snapshot.lookback_days);
    let (metrics, snapshot) = fit(&mut pipeline, lookback)?;
    pipeline.save_model(&args.out)?;
    let name = pipeline.model().map_or("", |m| m.name.as_str());
    print_json(&TrainOutput {
        model: name,
        metrics,
        snapshot,
        saved_to: args.out.clone(),
    });
    Ok(())
}

fn predict(args: PredictArgs) -> Result<(), PipelineError> {
    let pipeline = ready_pipeline(&args.inputs)?;
    print_json(&pipeline.predict(&args.patient)?);
    Ok(())
}

fn cohort(args: CohortArgs) -> Result<(), PipelineError> {
    let pipeline = ready_pipeline(&args.inputs)?;
    print_json(&pipeline.cohort_summary(args.threshold)?);
    Ok(())
}

fn report(args: ModelArgs) -> Result<(), PipelineError> {
    let pipeline = ready_pipeline(&args)?;
    print_json(&pipeline.report()?);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Cohort(args)) => cohort(args),
        Some(Commands::Report(args)) => report(args),
        Some(Commands::Version) => {
            println!("riskwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        match serde_json::to_string_pretty(&e.report()) {
            Ok(text) => eprintln!("{text}"),
            Err(_) => eprintln!("Error: {e}"),
        }
        process::exit(1);
    }
}
