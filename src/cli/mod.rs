//! Command-line interface for parseq.
//!
//! Runs and checks declarative plans and shows the resolved configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::config;
use crate::core::{request, time_limit_from_millis, Plan};

/// parseq - Asynchronous requestor orchestration
#[derive(Parser, Debug)]
#[command(name = "parseq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a plan and print its outcome as JSON
    Run {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Initial input (parsed as JSON, falling back to a plain string)
        #[arg(short, long)]
        input: Option<String>,

        /// Time limit for the root node in milliseconds (overrides config)
        #[arg(long, allow_hyphen_values = true)]
        time_limit_ms: Option<i64>,
    },

    /// Validate a plan without running it
    Check {
        /// Plan file (YAML)
        plan: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                plan,
                input,
                time_limit_ms,
            } => run_plan(plan, input, time_limit_ms).await,
            Commands::Check { plan } => check_plan(plan),
            Commands::Config => show_config(),
        }
    }
}

async fn run_plan(path: PathBuf, input: Option<String>, time_limit_ms: Option<i64>) -> Result<()> {
    let settings = config::config()?;
    let plan = Plan::from_file(&path)?;

    let mut defaults = settings.defaults;
    if let Some(millis) = time_limit_ms {
        defaults.time_limit = time_limit_from_millis(millis)?;
    }

    let requestor = plan
        .build(&defaults)
        .with_context(|| format!("Failed to build plan '{}'", plan.name))?;
    let input = input.map(parse_input).unwrap_or(Value::Null);

    info!(plan = %plan.name, "Running plan");

    let outcome = tokio::select! {
        outcome = request(&*requestor, input) => outcome,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted; plan '{}' cancelled", plan.name),
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(reason) => {
            println!("{}", serde_json::to_string_pretty(&reason)?);
            Err(anyhow::Error::new(reason).context(format!("Plan '{}' failed", plan.name)))
        }
    }
}

fn check_plan(path: PathBuf) -> Result<()> {
    let settings = config::config()?;
    let plan = Plan::from_file(&path)?;
    plan.validate(&settings.defaults)?;

    println!("Plan '{}' is valid", plan.name);
    Ok(())
}

fn show_config() -> Result<()> {
    let settings = config::config()?;

    println!("parseq Configuration");
    println!("====================");
    match &settings.config_file {
        Some(path) => println!("Config file:  {}", path.display()),
        None => println!("Config file:  (none, using defaults)"),
    }
    match settings.defaults.time_limit {
        Some(limit) => println!("Time limit:   {}ms", limit.as_millis()),
        None => println!("Time limit:   none"),
    }
    match settings.defaults.throttle {
        0 => println!("Throttle:     unbounded"),
        throttle => println!("Throttle:     {}", throttle),
    }
    println!("Log filter:   {}", settings.log_filter);

    Ok(())
}

fn parse_input(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw))
}
