//! DevOps lab CLI
//!
//! Run lab commands against a daemon, browse its pipeline and incidents,
//! or open an interactive shell on a remote or in-process lab.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{exec, shell, status};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DevOps lab CLI
#[derive(Parser)]
#[command(name = "labctl")]
#[command(author, version, about = "Terminal client for the DevOps lab", long_about = None)]
pub struct Cli {
    /// Lab daemon URL (can also be set via LABCTL_API_URL env var)
    #[arg(long, env = "LABCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one lab command, e.g. `labctl exec deploy --weight 20`
    Exec {
        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },

    /// Open an interactive lab shell
    Shell {
        /// Run the lab in this process instead of connecting to a daemon
        #[arg(long)]
        local: bool,

        /// RNG seed for a local lab
        #[arg(long, requires = "local")]
        seed: Option<u64>,

        /// History file for a local lab
        #[arg(long, requires = "local")]
        history_file: Option<PathBuf>,

        /// Scenario JSON file for a local lab
        #[arg(long, requires = "local")]
        scenario: Option<PathBuf>,
    },

    /// Show pipeline, canary analysis and pods
    Status,

    /// Show active and resolved incidents
    Incidents,

    /// Show command history
    History,

    /// Save CLI defaults
    Configure {
        /// Default daemon URL
        #[arg(long)]
        default_api_url: Option<String>,

        /// Default history file for `shell --local`
        #[arg(long)]
        history_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let settings = config::Config::load()?;
    let api_url = settings.resolve_api_url(cli.api_url.as_deref());

    match cli.command {
        Commands::Exec { line } => {
            let client = client::ApiClient::new(&api_url)?;
            exec::exec(&client, &line.join(" "), cli.format).await?;
        }
        Commands::Shell {
            local,
            seed,
            history_file,
            scenario,
        } => {
            if local {
                let options = shell::LocalOptions {
                    seed,
                    history_file: settings.resolve_history_file(history_file)?,
                    scenario,
                };
                shell::run_local(options).await?;
            } else {
                shell::run_remote(client::ApiClient::new(&api_url)?).await?;
            }
        }
        Commands::Status => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Incidents => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_incidents(&client, cli.format).await?;
        }
        Commands::History => {
            let client = client::ApiClient::new(&api_url)?;
            exec::history(&client, cli.format).await?;
        }
        Commands::Configure {
            default_api_url,
            history_file,
        } => {
            let mut settings = settings;
            if let Some(url) = default_api_url {
                client::ApiClient::new(&url)?;
                settings.api_url = Some(url);
            }
            if let Some(path) = history_file {
                settings.history_file = Some(path);
            }
            let path = settings.save()?;
            output::print_success(&format!("Saved {}", path.display()));
        }
    }

    Ok(())
}
