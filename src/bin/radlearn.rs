//! radlearn command-line front end
//!
//! **Usage:**
//! ```bash
//! radlearn [--config radlearn.toml] [--log feedback_logs.json] <COMMAND>
//!
//! radlearn process response.json          # normalize + map + explain + rules
//! radlearn feedback --original a.json --edited b.json --image cxr-001.png
//! radlearn rules
//! radlearn analytics
//! radlearn stats
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use radlearn::explain::Explanation;
use radlearn::{ModelOutput, Pipeline, RadConfig, Report};

/// Chest X-ray report pipeline with reviewer feedback learning
#[derive(Parser, Debug)]
#[clap(name = "radlearn", version)]
struct Args {
    /// TOML configuration file
    #[clap(long, short, env = "RADLEARN_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feedback log path (overrides the configuration)
    #[clap(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Compact JSON output
    #[clap(long)]
    compact: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a raw model response (JSON or text with a fenced JSON block)
    Process {
        /// Response file, `-` for stdin
        #[clap(value_name = "FILE", default_value = "-")]
        input: String,
    },

    /// Save a reviewer correction
    Feedback {
        /// Report as shown to the reviewer
        #[clap(long, value_name = "FILE")]
        original: PathBuf,

        /// Report after the reviewer's edits
        #[clap(long, value_name = "FILE")]
        edited: PathBuf,

        /// Image file name the report belongs to
        #[clap(long)]
        image: String,

        /// Explanations shown alongside the report
        #[clap(long, value_name = "FILE")]
        explanations: Option<PathBuf>,
    },

    /// List mined rules
    Rules {
        /// One line per rule instead of JSON
        #[clap(long)]
        plain: bool,
    },

    /// Analytics over the feedback log (`automated_adjustments` counts this run only)
    Analytics,

    /// Learning and feedback statistics
    Stats,
}

#[derive(Serialize)]
struct Stats {
    learning: radlearn::LearningStatistics,
    feedback: radlearn::FeedbackStatistics,
    classifier: radlearn::rules::ClassifierProfile,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("radlearn=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RadConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RadConfig::from_env().context("reading RADLEARN_* environment")?,
    };
    if let Some(log) = args.log {
        config.log_path = log;
    }
    info!(log = %config.log_path.display(), "using feedback log");

    let pipeline = Pipeline::from_config(&config).context("opening pipeline")?;
    let compact = args.compact;

    match args.command {
        Command::Process { input } => {
            let text = read_input(&input)?;
            let processed = pipeline.process(Ok(ModelOutput::Text(text)));
            emit(&processed, compact)?;
        }
        Command::Feedback {
            original,
            edited,
            image,
            explanations,
        } => {
            let original: Report = read_json(&original)?;
            let edited: Report = read_json(&edited)?;
            let explanations: Option<Vec<Explanation>> =
                explanations.as_deref().map(read_json).transpose()?;

            let edit_count = pipeline.save_feedback(
                &original,
                Some(&edited),
                explanations.as_deref(),
                &image,
            )?;
            println!("saved feedback for {image}: {edit_count} edit(s)");
        }
        Command::Rules { plain } => {
            let rules = pipeline.rules();
            if plain {
                for rule in &rules {
                    println!("{}  {}", rule.id, rule.describe());
                }
            } else {
                emit(&rules, compact)?;
            }
        }
        Command::Analytics => emit(&pipeline.analytics(), compact)?,
        Command::Stats => emit(
            &Stats {
                learning: pipeline.learning_statistics(),
                feedback: pipeline.feedback_statistics(),
                classifier: pipeline.classifier_profile(),
            },
            compact,
        )?,
    }

    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("reading {input}"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if text.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn emit<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{text}");
    Ok(())
}
