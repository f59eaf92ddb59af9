//! GraphQL request/response boundary.
//!
//! Query documents are built from a fixed template plus typed variables, so
//! values such as advisory identifiers never become part of the query text.
//! The [`QueryExecutor`] sends one document and hands back the `data` payload;
//! it does not paginate and does not retry.

use crate::config::Config;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// A query template and its variables, serialized as the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryDocument {
    pub query: &'static str,
    pub variables: Map<String, Value>,
}

impl QueryDocument {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            variables: Map::new(),
        }
    }

    pub fn variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    /// Set `name` only when a value is present; absent variables are null.
    pub fn optional_variable(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.variable(name, value),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Sends query documents to the remote API.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` and return the non-null `data` payload.
    ///
    /// A response without data, or with server-reported errors, is a
    /// [`SyncError::GraphQL`].
    async fn execute(&self, query: &QueryDocument) -> Result<Value>;
}

/// Raw response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

impl GraphQlResponse {
    pub fn into_data(self) -> Result<Value> {
        if let Some(errors) = self.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| match &e.error_type {
                    Some(t) => format!("{t}: {}", e.message),
                    None => e.message.clone(),
                })
                .collect();
            warn!("GraphQL errors: {:?}", messages);
            return Err(SyncError::graphql(messages.join("; ")));
        }

        match self.data {
            Some(Value::Null) | None => Err(SyncError::graphql("response carried no data")),
            Some(data) => Ok(data),
        }
    }
}

/// Executes queries against the GitHub GraphQL endpoint.
pub struct HttpQueryExecutor {
    token: String,
    client: ClientWithMiddleware,
    api_url: String,
}

impl HttpQueryExecutor {
    /// Build an executor.
    ///
    /// `max_retries` enables transport-level retries of transient HTTP
    /// failures; zero disables them.
    pub fn new(
        token: impl Into<String>,
        api_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let base_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut builder = ClientBuilder::new(base_client);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            token: token.into(),
            client: builder.build(),
            api_url: api_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.github_token.clone(),
            config.api_url.clone(),
            Duration::from_secs(config.http_timeout_secs),
            config.http_max_retries,
        )
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, query: &QueryDocument) -> Result<Value> {
        let body = serde_json::to_string(query)?;
        debug!(variables = ?query.variables, "Sending GraphQL query");

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "ghsa-sync")
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            warn!("GraphQL endpoint error {}: {}", status, text);
            return Err(SyncError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: GraphQlResponse = response.json().await?;
        envelope.into_data()
    }
}
