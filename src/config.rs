//! Client configuration loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};
use crate::policy::TransferPolicy;

const DEFAULT_ENDPOINT: &str = "http://localhost:8888";
/// Whole-request timeout (300 s), large enough for one upload chunk
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 100;
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Filer base URL, e.g. `http://filer:8888`
    pub endpoint: String,
    pub policy: TransferPolicy,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            policy: TransferPolicy::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn from_json_str(json: &str) -> TransferResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TransferError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> TransferResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TransferError::io(path, e))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> TransferResult<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(TransferError::Config("endpoint is empty".into()));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TransferError::Config(format!(
                "endpoint must start with http:// or https://: {}",
                endpoint
            )));
        }
        self.policy.validate()
    }

    /// Endpoint without trailing slashes.
    pub fn base_url(&self) -> String {
        self.endpoint.trim().trim_end_matches('/').to_string()
    }

    pub fn build_http_client(&self) -> TransferResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT);
        if self.request_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(self.request_timeout_ms));
        }
        if self.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        }
        Ok(builder.build()?)
    }
}
