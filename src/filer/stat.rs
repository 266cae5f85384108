use log::debug;
use reqwest::{header, StatusCode};

use super::types::{RawStat, Stat};
use super::{status_error, FilerClient};
use crate::error::{TransferError, TransferResult};
use crate::path::normalize_path;

impl FilerClient {
    /// Metadata for a file or directory; a missing entry is `NotFound`.
    pub async fn stat(&self, path: &str) -> TransferResult<Stat> {
        let path = normalize_path(path);
        let url = self.url(&path, &[("metadata".to_string(), "true".to_string())])?;

        let response = self
            .http()
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransferError::NotFound(path));
        }
        if response.status().as_u16() >= 400 {
            return Err(status_error("stat", response).await);
        }

        let body = response.bytes().await?;
        let raw: RawStat = serde_json::from_slice(&body)?;
        let stat = Stat::from(raw);
        debug!("stat: {} size={} is_dir={}", path, stat.size, stat.is_dir);
        Ok(stat)
    }

    pub async fn exists(&self, path: &str) -> TransferResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(TransferError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
