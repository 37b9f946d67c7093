//! One-shot lab commands

use anyhow::Result;

use crate::client::{ApiClient, ClientError};
use crate::output::{print_json, print_warning, OutputFormat};

/// Run one line on the daemon. Rejected input becomes an error so the
/// process exits non-zero.
pub async fn exec(client: &ApiClient, line: &str, format: OutputFormat) -> Result<()> {
    let response = client.exec(line).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if !response.accepted {
                return Err(ClientError::Rejected(response.output.join("\n")).into());
            }
            for line in &response.output {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

/// Show the daemon's command history, oldest first
pub async fn history(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let entries = client.history().await?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            if entries.is_empty() {
                print_warning("No commands recorded yet");
                return Ok(());
            }
            for (i, entry) in entries.iter().enumerate() {
                println!("{:>5}  {}", i + 1, entry);
            }
        }
    }

    Ok(())
}
