//! Neo4j graph store over the HTTP transactional endpoint
//!
//! Each template runs as a single auto-commit transaction
//! (`POST {uri}/db/{database}/tx/commit`) with the statement text taken from
//! the template catalog and the bound parameters sent as a separate map.

use super::{GraphStore, Params, Row};
use crate::config::GraphStoreConfig;
use crate::engine::TemplateSpec;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const PING_STATEMENT: &str = "RETURN 1 AS ok";

/// Neo4j HTTP client
pub struct Neo4jStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    statements: [StatementRequest<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatementRequest<'a> {
    statement: &'a str,
    parameters: &'a Params,
    result_data_contents: [&'static str; 1],
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

impl Neo4jStore {
    /// Create a new store client
    pub fn new(config: &GraphStoreConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create graph store client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                config.uri.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout,
        })
    }

    async fn run(&self, statement: &str, params: &Params) -> Result<Vec<Row>> {
        let request = CommitRequest {
            statements: [StatementRequest {
                statement,
                parameters: params,
                result_data_contents: ["row"],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, self.password.as_deref())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::StoreUnavailable {
                message: format!("graph store returned {}: {}", status, body),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::Configuration {
                message: format!("graph store rejected credentials ({})", status),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::StoreQuery {
                message: format!("graph store returned {}: {}", status, body),
            });
        }

        let payload: CommitResponse = response.json().await.map_err(|e| AppError::StoreQuery {
            message: format!("Failed to parse graph store response: {}", e),
        })?;

        if let Some(error) = payload.errors.into_iter().next() {
            let message = format!("{}: {}", error.code, error.message);
            // Neo.TransientError codes may succeed on retry
            return Err(if error.code.starts_with("Neo.TransientError") {
                AppError::StoreUnavailable { message }
            } else {
                AppError::StoreQuery { message }
            });
        }

        Ok(payload
            .results
            .into_iter()
            .flat_map(|result| {
                let columns = result.columns;
                result
                    .data
                    .into_iter()
                    .map(move |data| columns.iter().cloned().zip(data.row).collect::<Row>())
            })
            .collect())
    }

    fn transport_error(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::StoreTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::StoreUnavailable {
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn query(&self, template: &TemplateSpec, params: &Params) -> Result<Vec<Row>> {
        let statement = template.statement().ok_or_else(|| AppError::StoreQuery {
            message: format!("{} has no single statement", template.id),
        })?;

        tracing::debug!(template = %template.id, params = params.len(), "Running graph statement");
        self.run(statement, params).await
    }

    async fn ping(&self) -> Result<()> {
        self.run(PING_STATEMENT, &Params::new()).await.map(|_| ())
    }

    fn name(&self) -> &str {
        "neo4j"
    }
}
