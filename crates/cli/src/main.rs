//! OptiBalancer CLI
//!
//! A command-line tool for previewing routing decisions offline and
//! inspecting a running balancer daemon.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use balancer_lib::balancer::Target;
use clap::{Parser, Subcommand};
use commands::{plan, status};
use std::path::PathBuf;

/// OptiBalancer CLI
#[derive(Parser)]
#[command(name = "obctl")]
#[command(author, version, about = "CLI for the OptiBalancer traffic balancer", long_about = None)]
pub struct Cli {
    /// Daemon endpoint URL (can also be set via OBCTL_API_URL env var)
    #[arg(long, env = "OBCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table]
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Preview the routing decision for a recorded scenario (offline)
    Plan {
        /// Scenario JSON: request fields, upstream and optional current rule
        scenario: PathBuf,

        #[command(flatten)]
        overrides: plan::PlanOverrides,
    },

    /// List reconcile targets known to the daemon
    Targets {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show the last outcome of one target
    Target {
        /// Target as namespace/deployment
        target: Target,
    },

    /// Show daemon health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let format = config.resolve_format(cli.format);
    let api_url = config.resolve_api_url(cli.api_url);

    if cli.verbose {
        output::print_info(&format!("Using daemon at {}", api_url));
    }

    match cli.command {
        Commands::Plan {
            scenario,
            overrides,
        } => {
            plan::run(&scenario, &overrides, format)?;
        }
        Commands::Targets { namespace } => {
            let client = client::ApiClient::new(&api_url)?;
            status::list_targets(&client, namespace, format).await?;
        }
        Commands::Target { target } => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_target(&client, &target, format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_health(&client, format).await?;
        }
    }

    Ok(())
}
