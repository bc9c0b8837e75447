//! Outbound POST of encoded packages to in-world callback URLs.
//!
//! Delivery is fire-and-forget: failures are logged (with the URL and token
//! redacted) and never retried. The caller detects silence and resubmits.
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;

use crate::logutil::redact_secrets;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("callback timed out after {0:?}")]
    Timeout(Duration),

    #[error("callback returned status {0}")]
    Status(u16),

    #[error("callback transport error: {0}")]
    Transport(String),
}

pub struct CallbackClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl CallbackClient {
    pub fn new(post_timeout_seconds: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(post_timeout_seconds.max(1)),
        }
    }

    /// POST `body` as text/plain with the registration token appended as `token=`.
    pub async fn deliver(&self, url: &str, token: &str, body: String) -> Result<(), DeliveryError> {
        let target = with_token(url, token);
        let request = self
            .client
            .post(&target)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
            .map_err(|e| DeliveryError::Transport(redact_secrets(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Callback to {} returned {}",
                redact_secrets(&target),
                status.as_u16()
            );
            return Err(DeliveryError::Status(status.as_u16()));
        }
        debug!("Callback delivered to {}", redact_secrets(&target));
        Ok(())
    }
}

pub fn with_token(url: &str, token: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", url, sep, urlencoding::encode(token))
}
