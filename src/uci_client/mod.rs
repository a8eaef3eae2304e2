//! Client for the UCI configuration daemon.
//!
//! The daemon owns the configuration; this process only queries subtrees and
//! submits edit transactions. Each call is a single request/response over the
//! daemon's unix socket. `apply` is atomic on the daemon side: an edit is
//! either applied as a whole or not at all. No retries happen in here,
//! callers decide whether their write is safe to repeat.

#[cfg(any(test, feature = "mock"))]
mod memory;

#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryStore;

use crate::{
    config::StoreConfig,
    config_tree::{EditTransaction, QueryResult},
    http_client::{handle_store_response, transport_error, unix_socket_client},
};
use anyhow::Result;
use log::{debug, info};
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use trait_variant::make;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    /// Transport failure; the effect of a write is unknown.
    #[error("config store unreachable: {0}")]
    Unreachable(String),
    /// Deadline exceeded; the effect of a write is unknown.
    #[error("config store did not answer in time")]
    Timeout,
    /// The store refused the request; nothing was applied.
    #[error("config store rejected the request: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether a failed write may nevertheless have been applied.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, StoreError::Unreachable(_) | StoreError::Timeout)
    }
}

/// Scopes a query to the named top-level configs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Filter {
    configs: Vec<String>,
}

impl Filter {
    pub fn configs(names: &[&str]) -> Self {
        Self {
            configs: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Everything this frontend keeps about itself.
    pub fn foris() -> Self {
        Self::configs(&["foris"])
    }

    pub fn includes(&self, config: &str) -> bool {
        self.configs.iter().any(|name| name == config)
    }
}

#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait ConfigStore {
    async fn query(&self, filter: Filter) -> Result<QueryResult, StoreError>;
    async fn apply(&self, edit: EditTransaction) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct UciClient {
    client: Client,
}

impl UciClient {
    const QUERY_ENDPOINT: &str = "/uci/query/v1";
    const APPLY_ENDPOINT: &str = "/uci/apply/v1";

    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = unix_socket_client(&config.socket_path.to_string_lossy(), config.timeout)?;
        Ok(UciClient { client })
    }

    fn build_url(&self, path: &str) -> String {
        // Normalize path to always start with a single "/"
        let normalized_path = path.trim_start_matches('/');
        format!("http://localhost/{normalized_path}")
    }

    /// POST request to the daemon with JSON body
    async fn post_json(&self, path: &str, body: &impl Serialize) -> Result<String, StoreError> {
        let url = self.build_url(path);
        let context_msg = format!("POST {url}");
        debug!("{context_msg}");

        let res = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, &context_msg))?;

        handle_store_response(res, &context_msg).await
    }
}

impl ConfigStore for UciClient {
    async fn query(&self, filter: Filter) -> Result<QueryResult, StoreError> {
        let body = self.post_json(Self::QUERY_ENDPOINT, &filter).await?;

        let result: QueryResult = serde_json::from_str(&body)
            .map_err(|e| StoreError::Unreachable(format!("failed to parse query result: {e}")))?;

        result
            .tree()
            .validate()
            .map_err(|e| StoreError::Unreachable(format!("malformed query result: {e}")))?;

        Ok(result)
    }

    async fn apply(&self, edit: EditTransaction) -> Result<(), StoreError> {
        self.post_json(Self::APPLY_ENDPOINT, &edit).await?;
        info!(
            "applied edit to configs: {:?}",
            edit.tree()
                .configs()
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
        );
        Ok(())
    }
}
