//! Tumor Triage CLI
//!
//! Classify brain MRI scans from the command line and inspect checkpoints.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use tumor_triage::backend::{backend_name, has_accelerator};
use tumor_triage::inference::predict;
use tumor_triage::labels::ClassLabel;
use tumor_triage::preprocess::{IMAGENET_MEAN, IMAGENET_STD, INPUT_SHAPE};
use tumor_triage::utils::logging::{init_logging, LogConfig, LogLevel};
use tumor_triage::ServiceConfig;

/// Brain MRI triage with a ResNeXt-50 classifier
#[derive(Parser, Debug)]
#[command(name = "tumor_triage")]
#[command(version)]
#[command(about = "Brain MRI triage: ResNeXt-50 inference with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long, env = "TRIAGE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// JSON service configuration (checkpoint, top_k, architecture)
    #[arg(short, long, env = "TRIAGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a single image
    Predict {
        /// Path to trained checkpoint (.pth or .safetensors)
        #[arg(short, long, env = "TRIAGE_MODEL")]
        model: Option<PathBuf>,

        /// Path to input image
        #[arg(short, long)]
        image: PathBuf,

        /// Number of classes to report
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Load a checkpoint and report how it mapped onto the network
    Inspect {
        /// Path to trained checkpoint (.pth or .safetensors)
        #[arg(short, long, env = "TRIAGE_MODEL")]
        model: Option<PathBuf>,
    },

    /// Show labels, preprocessing constants and backend
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(LogLevel::parse_lossy(level));
    }

    let _ = init_logging(&log_config);

    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Commands::Predict {
            model,
            image,
            top_k,
            json,
        } => {
            let mut config = config;
            if let Some(model) = model {
                config = config.with_checkpoint(model);
            }
            if let Some(top_k) = top_k {
                config = config.with_top_k(top_k);
            }
            cmd_predict(&config, &image, json)?;
        }

        Commands::Inspect { model } => {
            let config = match model {
                Some(model) => config.with_checkpoint(model),
                None => config,
            };
            cmd_inspect(&config)?;
        }

        Commands::Info => {
            print_banner();
            cmd_info(&config);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------+
 |   Tumor Triage                                       |
 |   Brain MRI classification with Burn + Rust          |
 +------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_predict(config: &ServiceConfig, image: &Path, json: bool) -> Result<()> {
    info!("Running inference");
    info!("  Image: {}", image.display());
    info!("  Model: {}", config.checkpoint.display());

    let classifier = config
        .load_classifier()
        .with_context(|| format!("failed to load model {}", config.checkpoint.display()))?;

    let result = predict(image, &classifier, config.top_k)
        .with_context(|| format!("prediction failed for {}", image.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "{}",
        image.file_name().unwrap_or_default().to_string_lossy().bold()
    );
    print!("{}", result.display());

    Ok(())
}

fn cmd_inspect(config: &ServiceConfig) -> Result<()> {
    println!("{}", "Checkpoint Inspection:".cyan().bold());
    println!("  Path:    {}", config.checkpoint.display());
    println!("  Backend: {}", backend_name());
    println!();

    let classifier = config
        .load_classifier()
        .with_context(|| format!("failed to load model {}", config.checkpoint.display()))?;

    if let Some(report) = classifier.report() {
        println!("{}", "Loaded:".green().bold());
        println!("  Format:          {:?}", report.format);
        println!("  Layout:          {:?}", report.layout);
        println!("  Tensors applied: {}", report.applied);
        println!("  Buffers ignored: {}", report.ignored_buffers);
        println!("  Load time:       {:.1}ms", report.load_time_ms);
    }

    Ok(())
}

fn cmd_info(config: &ServiceConfig) {
    println!("{}", "Labels:".cyan().bold());
    for label in ClassLabel::ALL {
        println!("  {}: {}", label.index(), label);
    }
    println!();

    println!("{}", "Preprocessing:".cyan().bold());
    println!("  Input shape: {:?}", INPUT_SHAPE);
    println!("  Mean:        {:?}", IMAGENET_MEAN);
    println!("  Std:         {:?}", IMAGENET_STD);
    println!();

    println!("{}", "Runtime:".cyan().bold());
    println!("  Backend:     {}", backend_name());
    println!(
        "  Accelerator: {}",
        if has_accelerator() { "yes" } else { "no" }
    );
    println!("  Checkpoint:  {}", config.checkpoint.display());
    println!("  Top-K:       {}", config.top_k);
    println!("  Version:     {}", tumor_triage::VERSION);
}
