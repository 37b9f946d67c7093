//! API client for communicating with a lab daemon

use anyhow::{Context, Result};
use lab_core::{Incident, LabSnapshot};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("{0}")]
    Rejected(String),
}

/// API client for the lab daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach the lab daemon")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to reach the lab daemon")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn exec(&self, line: &str) -> Result<ExecResponse> {
        self.post("api/v1/exec", &ExecRequest { line: line.to_string() })
            .await
    }

    pub async fn snapshot(&self) -> Result<LabSnapshot> {
        self.get("api/v1/snapshot").await
    }

    pub async fn history(&self) -> Result<Vec<String>> {
        let response: HistoryResponse = self.get("api/v1/history").await?;
        Ok(response.entries)
    }

    pub async fn incidents(&self) -> Result<IncidentsResponse> {
        self.get("api/v1/incidents").await
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub output: Vec<String>,
    pub accepted: bool,
    pub clear: bool,
}

impl From<lab_core::Execution> for ExecResponse {
    fn from(execution: lab_core::Execution) -> Self {
        Self {
            output: execution.output.lines(),
            accepted: execution.accepted,
            clear: execution.output.is_clear(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentsResponse {
    pub active: Vec<Incident>,
    pub history: Vec<Incident>,
}
