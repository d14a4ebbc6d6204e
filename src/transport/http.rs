//! HTTP(S) transport built on reqwest.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use std::path::Path;
use std::time::Duration;

use super::{Transport, write_atomically};
use crate::error::{Error, Result, TransferError, WriteError};
use crate::locator::{Locator, Target};

/// Maximum redirects followed per request
const MAX_REDIRECTS: usize = 10;

/// Retrieves `http`/`https` locators; writes destinations to the local filesystem
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client that sends `user_agent` with every request
    pub fn new(user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(user_agent)
            .map_err(|e| Error::config("user_agent", format!("invalid User-Agent: {e}")))?;
        headers.insert(USER_AGENT, agent);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::config("user_agent", format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

fn classify_request_error(err: &reqwest::Error, timeout: Duration) -> TransferError {
    if err.is_timeout() {
        TransferError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransferError::Connection(err.to_string())
    } else {
        TransferError::Other(err.to_string())
    }
}

fn classify_status(status: StatusCode, url: &str) -> TransferError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            TransferError::NotFound(format!("{url} ({})", status.as_u16()))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransferError::Denied(format!("{url} ({})", status.as_u16()))
        }
        other => TransferError::Status {
            code: other.as_u16(),
            message: other
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        },
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransferError> {
        let Target::Url(url) = locator.target() else {
            return Err(TransferError::UnsupportedScheme(
                locator.scheme().to_string(),
            ));
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, timeout))?;

        let status = response.status();
        tracing::debug!(url = %url, status = status.as_u16(), "Received HTTP response");
        if !status.is_success() {
            return Err(classify_status(status, url.as_str()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_request_error(&e, timeout))?;
        Ok(body.to_vec())
    }

    async fn write(
        &self,
        destination: &Path,
        bytes: &[u8],
    ) -> std::result::Result<(), WriteError> {
        write_atomically(destination, bytes).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
