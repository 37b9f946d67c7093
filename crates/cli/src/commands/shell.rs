//! Interactive lab shell
//!
//! Talks to a daemon, or with `--local` runs a lab in this process. The local
//! lab keeps running between prompts, so pipelines advance and chaos
//! experiments recover while the shell waits for input.

use anyhow::{Context, Result};
use colored::Colorize;
use lab_core::{JsonFileScenarioSource, Lab, LabConfig, Notification};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::client::{ApiClient, ExecResponse};
use crate::output::{print_error, print_info, print_notification, print_warning};

const PROMPT: &str = "visitor@devops-lab:~$";
const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

/// Where shell commands run
pub enum Backend {
    Remote(ApiClient),
    Local(Arc<Lab>),
}

impl Backend {
    pub async fn execute(&self, line: &str) -> Result<ExecResponse> {
        match self {
            Backend::Remote(client) => client.exec(line).await,
            Backend::Local(lab) => Ok(lab.execute(line).into()),
        }
    }
}

/// Settings for an in-process lab
pub struct LocalOptions {
    pub seed: Option<u64>,
    pub history_file: PathBuf,
    pub scenario: Option<PathBuf>,
}

pub async fn run_remote(client: ApiClient) -> Result<()> {
    run(&Backend::Remote(client)).await
}

pub async fn run_local(options: LocalOptions) -> Result<()> {
    let config = LabConfig {
        seed: options.seed,
        history_path: Some(options.history_file),
        ..LabConfig::default()
    };
    let lab = Arc::new(Lab::named("labctl", config).context("Invalid lab configuration")?);

    if let Some(path) = options.scenario {
        match lab.load_scenario(&JsonFileScenarioSource::new(path)).await {
            Ok(scenario) => print_info(&format!("Scenario loaded: {}", scenario.title)),
            Err(e) => print_warning(&format!("{e}; using the built-in cluster")),
        }
    }

    lab.start();
    let toasts = tokio::spawn(print_toasts(lab.events().subscribe_notifications()));

    let result = run(&Backend::Local(lab.clone())).await;

    lab.shutdown();
    toasts.abort();
    result
}

async fn run(backend: &Backend) -> Result<()> {
    print_info("DevOps lab shell. Type `help` for commands, `exit` to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();
        if matches!(line, "exit" | "quit" | "logout") {
            break;
        }

        match backend.execute(line).await {
            Ok(response) if response.clear => print!("{}", CLEAR_SCREEN),
            Ok(response) => {
                for rendered in styled_lines(&response) {
                    println!("{}", rendered);
                }
            }
            Err(e) => print_error(&format!("{e:#}")),
        }
    }

    println!();
    Ok(())
}

fn prompt() {
    print!("{} ", PROMPT.green().bold());
    if let Err(e) = std::io::stdout().flush() {
        debug!(error = %e, "Failed to flush prompt");
    }
}

/// Output lines, red when the command was rejected
fn styled_lines(response: &ExecResponse) -> Vec<String> {
    response
        .output
        .iter()
        .map(|line| {
            if response.accepted {
                line.clone()
            } else {
                line.red().to_string()
            }
        })
        .collect()
}

async fn print_toasts(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(n) => {
                println!();
                print_notification(n.level, &n.title, &n.message);
                prompt();
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Dropped notifications"),
            Err(RecvError::Closed) => break,
        }
    }
}
