//! Process-wide operational counters for turns and deliveries.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static TURNS_TOTAL: AtomicU64 = AtomicU64::new(0);
static TURNS_FAILED: AtomicU64 = AtomicU64::new(0);
static HANDLE_RECREATIONS: AtomicU64 = AtomicU64::new(0);
static STATELESS_FALLBACKS: AtomicU64 = AtomicU64::new(0);
static LLM_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static LLM_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);
static JOBS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static JOBS_REJECTED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_OK: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_FAILED: AtomicU64 = AtomicU64::new(0);
static FETCH_INDIRECTIONS: AtomicU64 = AtomicU64::new(0);

pub fn inc_turns() {
    TURNS_TOTAL.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_turns_failed() {
    TURNS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_handle_recreations() {
    HANDLE_RECREATIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_stateless_fallbacks() {
    STATELESS_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}
pub fn observe_llm_latency(started: Instant) {
    let ms = started.elapsed().as_millis() as u64;
    LLM_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    LLM_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_jobs_accepted() {
    JOBS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_jobs_rejected() {
    JOBS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_deliveries_ok() {
    DELIVERIES_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_deliveries_failed() {
    DELIVERIES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fetch_indirections() {
    FETCH_INDIRECTIONS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub turns_total: u64,
    pub turns_failed: u64,
    pub handle_recreations: u64,
    pub stateless_fallbacks: u64,
    pub llm_latency_avg_ms: Option<u64>,
    pub jobs_accepted: u64,
    pub jobs_rejected: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
    pub fetch_indirections: u64,
}

pub fn snapshot() -> Snapshot {
    let sum = LLM_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = LLM_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        turns_total: TURNS_TOTAL.load(Ordering::Relaxed),
        turns_failed: TURNS_FAILED.load(Ordering::Relaxed),
        handle_recreations: HANDLE_RECREATIONS.load(Ordering::Relaxed),
        stateless_fallbacks: STATELESS_FALLBACKS.load(Ordering::Relaxed),
        llm_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
        jobs_accepted: JOBS_ACCEPTED.load(Ordering::Relaxed),
        jobs_rejected: JOBS_REJECTED.load(Ordering::Relaxed),
        deliveries_ok: DELIVERIES_OK.load(Ordering::Relaxed),
        deliveries_failed: DELIVERIES_FAILED.load(Ordering::Relaxed),
        fetch_indirections: FETCH_INDIRECTIONS.load(Ordering::Relaxed),
    }
}
