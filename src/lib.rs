//! # SLQuest - NPC chat and scavenger-hunt quests for Second Life
//!
//! SLQuest backs in-world NPCs with a remote language model and runs
//! find-the-object quests over props that register themselves from the grid.
//!
//! ## Features
//!
//! - **Conversation continuity**: one remote conversation per avatar and NPC, recreated
//!   when instructions change or the handle goes stale, with a stateless fallback.
//! - **Quests**: an object pool with staleness filtering, difficulty-scaled quest
//!   generation, idempotent find events and a one-shot reward action.
//! - **Async delivery**: turns queued on a bounded worker pool and POSTed back to
//!   in-world callback URLs as a compact pipe-delimited package, with a fetch
//!   indirection for packages over the byte ceiling.
//! - **Hardening**: atomic locked JSON records, secret redaction in logs, argon2
//!   admin secret, panic boundary with correlation ids.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slquest::config::Config;
//! use slquest::server::{serve, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     serve(AppState::from_config(config)?).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration and environment overrides
//! - [`quest`] - object pool and quest engine
//! - [`chat`] - conversation store, NPC personas, LLM seam, turn orchestration
//! - [`delivery`] - callback registry, wire codec, package cache, dispatch workers
//! - [`server`] - axum routes and the HTTP error boundary
//! - [`storage`] - atomic JSON record store
//! - [`validation`] - input validation and sanitization utilities
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  HTTP server    │ ← /chat, /chat_async, /pool, /quest, /admin
//! └─────────────────┘
//!          │
//! ┌─────────────────┐   ┌─────────────────┐
//! │ Turn            │ ← │ Quest engine    │
//! │ orchestrator    │   │ + object pool   │
//! └─────────────────┘   └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Dispatch +      │ → in-world callback URLs
//! │ delivery        │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Storage         │ ← JSON records under data_dir
//! └─────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod delivery;
pub mod logutil;
pub mod metrics;
pub mod quest;
pub mod server;
pub mod storage;
pub mod validation;
