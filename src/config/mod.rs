//! # Configuration Management Module
//!
//! All runtime settings for the quest server live in one TOML file, split into one
//! section per component. Every section has serde defaults so a partial file (or an
//! empty one) loads cleanly.
//!
//! ## Configuration Structure
//!
//! - [`ServerConfig`] - listener address, admin secret, request body ceiling
//! - [`LlmConfig`] - remote model endpoint, credentials and timeouts
//! - [`ConversationConfig`] - default NPC, reply budget, turn log sizing
//! - [`QuestConfig`] - object staleness window, recent-object FIFO, rewards
//! - [`CallbackConfig`] - callback tokens, package ceiling, worker pool sizing
//! - [`ProfileConfig`] - optional personalization lookup
//! - [`StorageConfig`] - data directory
//! - [`LoggingConfig`] - log level and files
//!
//! ## Usage
//!
//! ```rust,no_run
//! use slquest::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     println!("Listening on {}", config.server.bind);
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Integration
//!
//! Precedence is CLI args > environment > config file > defaults. The recognised
//! variables are `OPENAI_API_KEY`, `OPENAI_MODEL`, `SLQUEST_BIND` and
//! `SLQUEST_ADMIN_TOKEN`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub quest: QuestConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Argon2 PHC hash of the admin shared secret (set with `slquest admin-token`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token_hash: Option<String>,
    /// Plain shared secret, only ever populated from `SLQUEST_ADMIN_TOKEN`.
    #[serde(skip)]
    pub admin_token: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_string(),
            admin_token_hash: None,
            admin_token: None,
            max_body_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the Responses/Conversations API; `OPENAI_API_KEY` wins when set.
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Timeout for creating a remote conversation seeded with instructions.
    pub append_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-5.2".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 30,
            append_timeout_seconds: 10,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn append_timeout(&self) -> Duration {
        Duration::from_secs(self.append_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub default_npc_id: String,
    /// Byte budget for replies delivered in-world.
    pub reply_max_bytes: usize,
    pub turn_log_limit: usize,
    /// Turns replayed when the remote conversation is unavailable.
    pub stateless_history: usize,
    pub message_max_bytes: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            default_npc_id: "SLQuest_DefaultNPC".to_string(),
            reply_max_bytes: 1024,
            turn_log_limit: 40,
            stateless_history: 8,
            message_max_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestConfig {
    /// Objects not seen within this many seconds are left out of quest generation.
    pub pool_stale_seconds: i64,
    pub max_recent_objects: usize,
    /// Upper bound for the auto-scaled objective count; an explicit count is not capped.
    pub max_objectives: usize,
    pub reward_item: String,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            pool_stale_seconds: 7 * 24 * 3600,
            max_recent_objects: 20,
            max_objectives: 3,
            reward_item: "QUEST_REWARD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub token_ttl_seconds: i64,
    pub post_timeout_seconds: u64,
    /// Largest encoded package delivered directly; anything bigger goes through `/sl/fetch`.
    pub max_package_bytes: usize,
    pub package_ttl_seconds: i64,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 6 * 3600,
            post_timeout_seconds: 10,
            max_package_bytes: 2000,
            package_ttl_seconds: 300,
            workers: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enabled: bool,
    /// Base URL of the profile enricher; `/profile/enrich` is appended.
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("slquest.log".to_string()),
            security_file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply environment variable overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("SLQUEST_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("SLQUEST_ADMIN_TOKEN") {
            self.server.admin_token = Some(v);
        }
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.callback.workers == 0 {
            return Err(anyhow!("callback.workers must be at least 1"));
        }
        if self.callback.queue_capacity == 0 {
            return Err(anyhow!("callback.queue_capacity must be at least 1"));
        }
        if self.conversation.reply_max_bytes < 8 {
            return Err(anyhow!("conversation.reply_max_bytes must be at least 8"));
        }
        if self.quest.max_objectives == 0 {
            return Err(anyhow!("quest.max_objectives must be at least 1"));
        }
        if self.quest.pool_stale_seconds <= 0 {
            return Err(anyhow!("quest.pool_stale_seconds must be positive"));
        }
        if self.conversation.default_npc_id.trim().is_empty() {
            return Err(anyhow!("conversation.default_npc_id must not be empty"));
        }
        Ok(())
    }
}
