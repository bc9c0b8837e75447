//! Async turn dispatch.
//!
//! `/chat_async` validates the callback token and hands a [`TurnJob`] to the
//! [`DispatcherHandle`]. A fixed pool of worker tasks drains a bounded channel;
//! when it is full the submission is refused rather than queued without limit.
//!
//! Each job runs the quest pre-turn hook, the turn orchestrator and the quest
//! post-turn hook, encodes a result package, and POSTs it to the registered
//! callback. Packages over the size ceiling are parked in the package cache and a
//! small FETCH pointer is delivered instead.
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::callback::CallbackClient;
use super::codec::ResultPackage;
use super::package_cache::PackageCache;
use super::registry::CallbackRegistry;
use crate::chat::orchestrator::{TurnOrchestrator, TurnRequest};
use crate::logutil::escape_log;
use crate::metrics;
use crate::quest::QuestEngine;

#[derive(Debug, Clone)]
pub struct TurnJob {
    pub request_id: String,
    pub avatar_id: String,
    pub npc_id: String,
    pub object_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,

    #[error("dispatcher is shut down")]
    Closed,
}

/// Shared collaborators for every job.
pub struct JobContext {
    pub quests: Arc<QuestEngine>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub registry: Arc<CallbackRegistry>,
    pub packages: Arc<PackageCache>,
    pub callbacks: CallbackClient,
    pub max_package_bytes: usize,
}

/// What a job ended up sending; returned for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub request_id: String,
    pub body: Option<String>,
    pub fetch_token: Option<String>,
    pub delivered: bool,
}

#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<TurnJob>,
}

impl DispatcherHandle {
    /// Queue a job without waiting; fails immediately when the queue is full.
    pub fn submit(&self, job: TurnJob) -> Result<(), DispatchError> {
        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::inc_jobs_accepted();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                metrics::inc_jobs_rejected();
                warn!("Dispatch queue full; rejecting request {}", job.request_id);
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Start `workers` tasks draining a queue of `capacity` jobs.
pub fn start_dispatcher(ctx: Arc<JobContext>, workers: usize, capacity: usize) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel::<TurnJob>(capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers.max(1) {
        let rx = rx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                let request_id = job.request_id.clone();
                // Run each job in its own task so a panic cannot take the worker down.
                match tokio::spawn(process_job(ctx.clone(), job)).await {
                    Ok(report) => debug!(
                        "worker {} finished {} delivered={}",
                        worker_id, report.request_id, report.delivered
                    ),
                    Err(e) => {
                        let correlation_id = uuid::Uuid::new_v4();
                        error!(
                            "worker {} job {} aborted: {} correlation_id={}",
                            worker_id, request_id, e, correlation_id
                        );
                    }
                }
            }
            debug!("dispatch worker {} stopped", worker_id);
        });
    }
    info!(
        "Dispatcher started: {} workers, queue capacity {}",
        workers.max(1),
        capacity.max(1)
    );
    DispatcherHandle { tx }
}

/// Reply and side effects of one quest-aware turn, ready for a caller or a package.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestTurn {
    pub ok: bool,
    pub chat: String,
    pub actions: String,
    pub quest: String,
    pub error_code: Option<String>,
}

/// Quest pre-turn hook, orchestrated model turn, quest post-turn hook.
///
/// A reward granted after a failed model call still counts as success: the forced
/// completion reply replaces the apology.
pub async fn run_quest_turn(
    quests: &QuestEngine,
    orchestrator: &TurnOrchestrator,
    avatar_id: &str,
    npc_id: &str,
    message: &str,
) -> QuestTurn {
    let pre = quests.pre_turn(avatar_id, npc_id, message);

    let outcome = orchestrator
        .run_turn(&TurnRequest {
            avatar_id: avatar_id.to_string(),
            npc_id: npc_id.to_string(),
            message: message.to_string(),
            quest_context: pre.quest_context,
        })
        .await;

    let reward_item = outcome
        .npc
        .reward_item
        .clone()
        .unwrap_or_else(|| quests.default_reward_item().to_string());
    let model_reply = if outcome.ok { outcome.reply.as_str() } else { "" };
    let post = quests.post_turn(avatar_id, &reward_item, model_reply);

    let ok = outcome.ok || post.forced_reply.is_some();
    QuestTurn {
        ok,
        actions: merge_actions(&pre.actions, &post.actions),
        chat: post.forced_reply.unwrap_or(outcome.reply),
        quest: quests.status_line(avatar_id),
        error_code: if ok { None } else { outcome.error_code },
    }
}

/// Run one async turn end to end.
pub async fn process_job(ctx: Arc<JobContext>, job: TurnJob) -> JobReport {
    let turn = run_quest_turn(
        &ctx.quests,
        &ctx.orchestrator,
        &job.avatar_id,
        &job.npc_id,
        &job.message,
    )
    .await;

    let mut report = JobReport {
        request_id: job.request_id.clone(),
        body: None,
        fetch_token: None,
        delivered: false,
    };

    // Re-resolve: the object may have re-registered with a new URL while the model ran.
    let Some(registration) = ctx.registry.lookup(&job.object_id, &job.npc_id) else {
        warn!(
            "No live callback for object={} npc={}; dropping result {}",
            escape_log(&job.object_id),
            escape_log(&job.npc_id),
            job.request_id
        );
        metrics::inc_deliveries_failed();
        prune_expired(&ctx);
        return report;
    };

    let pkg = ResultPackage {
        request_id: job.request_id.clone(),
        user: job.avatar_id.clone(),
        npc: job.npc_id.clone(),
        ok: turn.ok,
        chat: turn.chat,
        actions: turn.actions,
        quest: turn.quest,
        callback_token: registration.token.clone(),
        error: turn.error_code.unwrap_or_default(),
    };

    let (body, fetch_token) = encode_for_delivery(&pkg, ctx.max_package_bytes, &ctx.packages);
    report.body = Some(body.clone());
    report.fetch_token = fetch_token;

    match ctx
        .callbacks
        .deliver(&registration.delivery_url, &registration.token, body)
        .await
    {
        Ok(()) => {
            metrics::inc_deliveries_ok();
            report.delivered = true;
        }
        Err(e) => {
            metrics::inc_deliveries_failed();
            warn!("Delivery of {} failed: {}", job.request_id, e);
        }
    }

    prune_expired(&ctx);
    report
}

fn prune_expired(ctx: &JobContext) {
    let packages = ctx.packages.prune();
    let callbacks = ctx.registry.prune();
    if packages + callbacks > 0 {
        debug!(
            "Pruned {} expired packages and {} lapsed callbacks",
            packages, callbacks
        );
    }
}

/// Encode `pkg`, falling back to a FETCH pointer when it exceeds `max_bytes`.
/// Returns the body to send and the fetch token when indirection was used.
pub fn encode_for_delivery(
    pkg: &ResultPackage,
    max_bytes: usize,
    packages: &PackageCache,
) -> (String, Option<String>) {
    let body = pkg.encode();
    if body.len() <= max_bytes {
        return (body, None);
    }
    let size = body.len();
    let token = packages.put(body);
    metrics::inc_fetch_indirections();
    debug!(
        "Package {} is {} bytes (limit {}); delivering fetch pointer",
        pkg.request_id, size, max_bytes
    );
    (pkg.to_fetch(&token).encode(), Some(token))
}

/// Pre-hook actions first, then post-hook actions, joined with `;`.
pub fn merge_actions(pre: &[String], post: &[String]) -> String {
    pre.iter()
        .chain(post.iter())
        .filter(|a| !a.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(";")
}
