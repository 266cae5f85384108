//! HTTP client for a SeaweedFS filer
//!
//! - `stat`: entry metadata (`?metadata=true`)
//! - `list`: paginated listings and recursive usage
//! - `write`: single writes, chunked uploads, deletes
//! - `download`: concurrent range downloads

mod download;
mod list;
mod stat;
mod types;
mod write;

use std::sync::Arc;

use reqwest::{Client, Response, Url};

use crate::config::ClientConfig;
use crate::error::{TransferError, TransferResult};
use crate::path::encode_path;
use crate::policy::TransferPolicy;

pub use download::FilerRangeSource;
pub use types::{Entry, ListPage, Stat, MODE_DIR};

/// Cheap to clone; clones share the connection pool and policy.
#[derive(Debug, Clone)]
pub struct FilerClient {
    endpoint: String,
    http: Client,
    policy: Arc<TransferPolicy>,
}

impl FilerClient {
    /// Client with default timeouts and policy.
    pub fn new(endpoint: impl Into<String>) -> TransferResult<Self> {
        Self::from_config(&ClientConfig::new(endpoint))
    }

    pub fn from_config(config: &ClientConfig) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self {
            endpoint: config.base_url(),
            http: config.build_http_client()?,
            policy: Arc::new(config.policy.clone()),
        })
    }

    /// Use a caller-built `reqwest::Client`.
    pub fn with_http_client(
        endpoint: impl Into<String>,
        http: Client,
        policy: TransferPolicy,
    ) -> TransferResult<Self> {
        policy.validate()?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            policy: Arc::new(policy),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    pub(crate) fn shared_policy(&self) -> Arc<TransferPolicy> {
        self.policy.clone()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Absolute URL for an already normalized filer path.
    pub(crate) fn url(&self, path: &str, query: &[(String, String)]) -> TransferResult<Url> {
        let raw = format!("{}{}", self.endpoint, encode_path(path));
        let mut url = Url::parse(&raw)
            .map_err(|e| TransferError::Config(format!("invalid URL {}: {}", raw, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Turn a failed response into `Status`, keeping the body for diagnostics.
pub(crate) async fn status_error(op: &'static str, response: Response) -> TransferError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransferError::Status { op, status, body }
}
