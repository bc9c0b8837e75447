//! HTTP surface.
//!
//! One axum router over a cloneable [`AppState`]. Every component is built once
//! here and shared through `Arc`s; handlers never reach for globals.
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

pub mod auth;
pub mod error;
pub mod handlers;

pub use auth::{hash_admin_secret, AdminAuth};
pub use error::ApiError;

use crate::chat::{
    ConversationStore, HttpProfileClient, LlmService, NoProfile, NpcStore, OpenAiResponsesClient,
    ProfileLookup, TurnOrchestrator,
};
use crate::config::Config;
use crate::delivery::{
    start_dispatcher, CallbackClient, CallbackRegistry, DispatcherHandle, JobContext, PackageCache,
};
use crate::quest::{ObjectPool, QuestEngine};
use crate::storage::{JsonStore, StorageError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub quests: Arc<QuestEngine>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub registry: Arc<CallbackRegistry>,
    pub packages: Arc<PackageCache>,
    pub dispatcher: DispatcherHandle,
    pub admin: AdminAuth,
}

impl AppState {
    /// Wire up production collaborators: the Responses API client and, when
    /// enabled, the profile enricher.
    pub fn from_config(config: Config) -> Result<Self, StorageError> {
        let llm: Arc<dyn LlmService> = Arc::new(OpenAiResponsesClient::new(config.llm.clone()));
        let profiles: Arc<dyn ProfileLookup> =
            if config.profile.enabled && !config.profile.url.trim().is_empty() {
                Arc::new(HttpProfileClient::new(&config.profile))
            } else {
                Arc::new(NoProfile)
            };
        Self::with_services(config, llm, profiles)
    }

    /// Build state around caller-supplied model and profile services.
    ///
    /// Starts the dispatch workers, so this must run inside a tokio runtime.
    pub fn with_services(
        config: Config,
        llm: Arc<dyn LlmService>,
        profiles: Arc<dyn ProfileLookup>,
    ) -> Result<Self, StorageError> {
        let store = JsonStore::new(config.storage.data_dir.clone())?;
        let pool = Arc::new(ObjectPool::open(store.clone(), config.quest.pool_stale_seconds));
        let quests = Arc::new(QuestEngine::new(pool, store.clone(), config.quest.clone()));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            llm,
            ConversationStore::new(store.clone()),
            NpcStore::new(store),
            profiles,
            config.conversation.clone(),
        ));
        let registry = Arc::new(CallbackRegistry::new(config.callback.token_ttl_seconds));
        let packages = Arc::new(PackageCache::new(config.callback.package_ttl_seconds));

        let ctx = Arc::new(JobContext {
            quests: quests.clone(),
            orchestrator: orchestrator.clone(),
            registry: registry.clone(),
            packages: packages.clone(),
            callbacks: CallbackClient::new(config.callback.post_timeout_seconds),
            max_package_bytes: config.callback.max_package_bytes,
        });
        let dispatcher = start_dispatcher(
            ctx,
            config.callback.workers,
            config.callback.queue_capacity,
        );

        let admin = AdminAuth::new(
            config.server.admin_token_hash.clone(),
            config.server.admin_token.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            quests,
            orchestrator,
            registry,
            packages,
            dispatcher,
            admin,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/chat_async", post(handlers::chat_async))
        .route("/sl/callback/register", post(handlers::register_callback))
        .route("/sl/fetch", get(handlers::fetch_package))
        .route("/pool/register", post(handlers::register_object))
        .route("/pool/status", get(handlers::pool_status))
        .route("/quest/event", post(handlers::quest_event))
        .route("/admin/npc/upsert", post(handlers::admin_npc_upsert))
        .route("/admin/conversation/reset", post(handlers::admin_conversation_reset))
        .route("/admin/profile/refresh", post(handlers::admin_profile_refresh))
        .route("/admin/stats", get(handlers::admin_stats))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(error::panic_response))
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("slquest listening on {}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("http server failed")?;
    Ok(())
}
