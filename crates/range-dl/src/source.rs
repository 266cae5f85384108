//! Where range bytes come from.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use log::debug;
use reqwest::{header, Client, StatusCode};

use crate::error::RangeError;
use crate::plan::ByteRange;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, RangeError>>;

/// A remote payload that can be sized and read by byte range.
///
/// Implementations must be shareable across worker tasks.
pub trait RangeSource: Send + Sync + 'static {
    /// Total payload size in bytes.
    fn total_size(&self) -> BoxFuture<'_, Result<u64, RangeError>>;

    /// Open the body. `None` requests the whole payload.
    fn open(&self, range: Option<ByteRange>) -> BoxFuture<'_, Result<BodyStream, RangeError>>;

    /// Short label for log lines.
    fn describe(&self) -> String;
}

/// Plain HTTP source: `GET <url>` with an optional `Range` header.
#[derive(Debug, Clone)]
pub struct HttpRangeSource {
    client: Client,
    url: String,
    known_size: Option<u64>,
}

impl HttpRangeSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            known_size: None,
        }
    }

    /// Skip the size probe when the caller already knows the size (e.g. from a stat call).
    pub fn with_size(mut self, size: u64) -> Self {
        self.known_size = Some(size);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn resolve_size(&self) -> Result<u64, RangeError> {
        if let Some(size) = self.known_size {
            return Ok(size);
        }

        let response = self
            .client
            .get(&self.url)
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RangeError::NotFound(self.url.clone()));
        }

        if response.status() == StatusCode::PARTIAL_CONTENT {
            if let Some(total) = response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
            {
                let _ = response.bytes().await;
                debug!("size_probe: {} content_range_total={}", self.url, total);
                return Ok(total);
            }
        }

        if !response.status().is_success() {
            return Err(RangeError::UnknownSize(format!(
                "probe returned {}",
                response.status()
            )));
        }

        let length = response
            .content_length()
            .ok_or_else(|| RangeError::UnknownSize("no Content-Length".to_string()))?;
        let _ = response.bytes().await;
        debug!("size_probe: {} content_length={}", self.url, length);
        Ok(length)
    }

    async fn open_body(&self, range: Option<ByteRange>) -> Result<BodyStream, RangeError> {
        let mut request = self.client.get(&self.url);
        let span = match range {
            Some(r) => {
                let end = r.end().ok_or(RangeError::InvalidRange {
                    start: r.start,
                    end: r.start,
                })?;
                if let Some(value) = r.header_value() {
                    request = request.header(header::RANGE, value);
                }
                Some((r.start, end))
            }
            None => None,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RangeError::NotFound(self.url.clone()));
        }

        let accepted = match span {
            Some(_) => status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT,
            None => status.is_success(),
        };
        if !accepted {
            let body = response.text().await.unwrap_or_default();
            return Err(RangeError::Status {
                status: status.as_u16(),
                range: span,
                body,
            });
        }

        Ok(response.bytes_stream().map_err(RangeError::from).boxed())
    }
}

impl RangeSource for HttpRangeSource {
    fn total_size(&self) -> BoxFuture<'_, Result<u64, RangeError>> {
        Box::pin(self.resolve_size())
    }

    fn open(&self, range: Option<ByteRange>) -> BoxFuture<'_, Result<BodyStream, RangeError>> {
        Box::pin(self.open_body(range))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Total from a `Content-Range: bytes 0-0/12345` header; `*` means unknown.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let total = value.split('/').nth(1)?.trim();
    if total == "*" {
        return None;
    }
    total.parse().ok()
}
