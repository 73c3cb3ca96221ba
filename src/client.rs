//! GraphQL client for the upstream API.
//!
//! Transient upstream failures (timeouts, 5xx statuses, soft-failure
//! bodies, the `errors` array) are absorbed here by retrying at a
//! fixed interval; rate exhaustion is not this module's concern, the
//! limiter handles it. Only a response that cannot be decoded is
//! surfaced to callers, because it means the contract changed.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::response::Response;

/// Wire shape of a query request.
#[derive(Serialize)]
struct Payload<'a> {
    query: &'a str,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub token: String,
    /// Delay between retries on transient upstream failures.
    pub retry_interval: Duration,
    /// Give up after this many retries; `None` retries forever, which
    /// matches the upstream being the only source of this data.
    pub max_retries: Option<u32>,
    /// Deadline for a single request.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: String, token: String) -> Self {
        Self {
            endpoint,
            token,
            retry_interval: Duration::from_secs(10),
            max_retries: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

enum Attempt {
    /// Transient; try again after the retry interval.
    Retry(String),
    /// Contract violation; fatal to the current cycle.
    Fatal(anyhow::Error),
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("gh-ranks/0.1.0")
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, config })
    }

    /// Post a query document once and return the raw response body.
    pub async fn fetch(&self, query: &str) -> Result<Vec<u8>> {
        let (_, body) = self.post(query).await?;
        Ok(body)
    }

    /// Post a query document and decode the typed envelope, retrying
    /// transient failures until the response is usable.
    pub async fn search<T: DeserializeOwned>(&self, query: &str) -> Result<Response<T>> {
        let mut retries = 0u32;
        loop {
            match self.attempt::<T>(query).await {
                Ok(response) => return Ok(response),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(reason)) => {
                    if let Some(max) = self.config.max_retries {
                        if retries >= max {
                            return Err(anyhow!(
                                "Upstream still failing after {} retries: {}",
                                retries,
                                reason
                            ));
                        }
                    }
                    retries += 1;
                    eprintln!(
                        "\x1b[33mUpstream failure ({}), retrying in {}s...\x1b[0m",
                        reason,
                        self.config.retry_interval.as_secs()
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    async fn post(&self, query: &str) -> Result<(reqwest::StatusCode, Vec<u8>), reqwest::Error> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&Payload { query })
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }

    async fn attempt<T: DeserializeOwned>(&self, query: &str) -> Result<Response<T>, Attempt> {
        let (status, body) = match self.post(query).await {
            Ok(pair) => pair,
            // Timeouts and connection drops are transient by nature
            Err(e) => return Err(Attempt::Retry(format!("transport: {}", e))),
        };
        if status.is_server_error() {
            return Err(Attempt::Retry(format!("HTTP {}", status)));
        }
        let response = match serde_json::from_slice::<Response<T>>(&body) {
            Ok(response) => response,
            Err(e) => {
                return Err(Attempt::Fatal(anyhow::Error::from(e).context(format!(
                    "Upstream response changed shape (HTTP {})",
                    status
                ))))
            }
        };
        classify_envelope(response)
    }
}

/// Envelope-level classification, in order: a non-empty `message` is
/// an upstream soft failure; a non-empty `errors` array likewise.
fn classify_envelope<T>(response: Response<T>) -> Result<Response<T>, Attempt> {
    if !response.message.is_empty() {
        return Err(Attempt::Retry(response.message));
    }
    if let Some(error) = response.errors.first() {
        return Err(Attempt::Retry(error.message.clone()));
    }
    Ok(response)
}
