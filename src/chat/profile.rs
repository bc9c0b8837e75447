//! Best-effort avatar personalization from the profile enricher service.
//!
//! Lookups never fail a turn: timeouts, transport errors and bad payloads all
//! collapse to "no card".
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::ProfileConfig;
use crate::logutil::redact_secrets;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafePersonalization {
    #[serde(default)]
    pub greeting_style: String,
    #[serde(default)]
    pub topics_to_offer: Vec<String>,
    #[serde(default)]
    pub safe_hooks: Vec<String>,
    #[serde(default)]
    pub tone_avoid: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileCard {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub safe_personalization: SafePersonalization,
}

impl ProfileCard {
    /// Instruction block describing the player, or `None` when the card says nothing useful.
    pub fn personalization_block(&self) -> Option<String> {
        let p = &self.safe_personalization;
        let mut lines = Vec::new();
        if !self.display_name.trim().is_empty() {
            lines.push(format!("display_name={}", self.display_name.trim()));
        }
        if !p.greeting_style.is_empty() {
            lines.push(format!("greeting_style={}", p.greeting_style));
        }
        if !p.topics_to_offer.is_empty() {
            lines.push(format!("topics_to_offer={}", p.topics_to_offer.join(", ")));
        }
        if !p.safe_hooks.is_empty() {
            lines.push(format!("safe_hooks={}", p.safe_hooks.join(", ")));
        }
        if !p.tone_avoid.is_empty() {
            lines.push(format!("tone_avoid={}", p.tone_avoid.join(", ")));
        }
        if lines.is_empty() {
            return None;
        }
        Some(format!("PLAYER_PROFILE:\n{}", lines.join("\n")))
    }
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn lookup(&self, avatar_id: &str, force: bool) -> Option<ProfileCard>;
}

/// Lookup used when personalization is disabled.
pub struct NoProfile;

#[async_trait]
impl ProfileLookup for NoProfile {
    async fn lookup(&self, _avatar_id: &str, _force: bool) -> Option<ProfileCard> {
        None
    }
}

pub struct HttpProfileClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProfileClient {
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/profile/enrich", config.url.trim_end_matches('/')),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }
}

#[async_trait]
impl ProfileLookup for HttpProfileClient {
    async fn lookup(&self, avatar_id: &str, force: bool) -> Option<ProfileCard> {
        let request = self
            .client
            .post(&self.url)
            .json(&json!({"avatar_uuid": avatar_id, "force": force}));
        let result = timeout(self.timeout, async {
            let response = request.send().await?.error_for_status()?;
            response.json::<ProfileCard>().await
        })
        .await;
        match result {
            Ok(Ok(card)) => Some(card),
            Ok(Err(e)) => {
                warn!("Profile lookup failed: {}", redact_secrets(&e.to_string()));
                None
            }
            Err(_) => {
                debug!("Profile lookup timed out after {:?}", self.timeout);
                None
            }
        }
    }
}
