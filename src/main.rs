//! Passgate CLI - evaluate tool calls, inspect the mapping table, and show
//! the resolved configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use passgate::config::{resolve_guardrail_script, resolve_passport_path, EvaluationMode};
use passgate::mapping::PolicyMap;
use passgate::{Evaluator, Gate, GateOptions, GateOutcome, ToolEvent};

#[derive(Parser)]
#[command(
    name = "passgate",
    about = "Pre-action authorization gate for agentic AI frameworks",
    version
)]
struct Cli {
    /// Path to a passgate config file (discovered when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host framework name used for config and passport discovery
    #[arg(long, global = true, default_value = "langchain")]
    framework: String,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a tool call and print the decision as JSON
    ///
    /// Exits 0 when allowed, 2 when blocked.
    Verify {
        /// Framework tool name
        #[arg(long)]
        tool: String,

        /// Tool parameters as a JSON object (reads stdin when omitted)
        #[arg(long)]
        context: Option<String>,
    },

    /// Print the policy id a tool name maps to
    Map { tool: String },

    /// Show the resolved configuration and backend paths
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Verify { tool, context } => {
            let params = read_params(context)?;
            let evaluator = Evaluator::new(cli.config, &cli.framework);
            let gate = Gate::new(evaluator, GateOptions::default());

            let outcome = gate.check(&ToolEvent::new(tool, params)).await;
            match outcome {
                GateOutcome::Allow { reasons } => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "allow": true,
                            "reasons": reasons,
                        }))?
                    );
                }
                GateOutcome::Block {
                    reason_text,
                    reasons,
                } => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "allow": false,
                            "reasons": reasons,
                        }))?
                    );
                    eprintln!("{reason_text}");
                    std::process::exit(2);
                }
            }
        }

        Commands::Map { tool } => match PolicyMap::built_in().map(&tool) {
            Some(policy) => println!("{policy}"),
            None => println!("(unmapped)"),
        },

        Commands::Config => {
            let evaluator = Evaluator::new(cli.config, &cli.framework);
            let config = evaluator.config();
            println!(
                "mode: {}",
                match config.mode {
                    EvaluationMode::Local => "local",
                    EvaluationMode::Api => "api",
                }
            );
            if config.mode == EvaluationMode::Api {
                println!("api_url: {}", config.api_url());
                println!(
                    "agent_id: {}",
                    config.agent_id.as_deref().unwrap_or("(from passport)")
                );
            }
            match resolve_passport_path(config) {
                Some(path) => println!("passport: {}", path.display()),
                None => println!("passport: (unresolved)"),
            }
            match resolve_guardrail_script(config) {
                Some(path) => println!("guardrail_script: {}", path.display()),
                None => println!("guardrail_script: (unresolved)"),
            }
        }
    }

    Ok(())
}

fn read_params(context: Option<String>) -> Result<Value> {
    let raw = match context {
        Some(raw) => raw,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read context from stdin")?;
            buffer
        }
    };
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw.trim()).context("Context must be valid JSON")
}
