//! Test utilities & fixtures.
//!
//! `ScriptedLlm` stands in for the remote model: each call pops the next scripted
//! result, falling back to a fixed conversation id / reply once the script runs dry.
#![allow(dead_code)]

use async_trait::async_trait;
use slquest::chat::llm::{CompletionRequest, LlmError, LlmService};
use slquest::config::Config;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub enum Call {
    Create { instructions: String },
    Complete(CompletionRequest),
}

#[derive(Default)]
pub struct ScriptedLlm {
    creates: Mutex<VecDeque<Result<String, LlmError>>>,
    completes: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Call>>,
    next_conv: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create(&self, result: Result<String, LlmError>) -> &Self {
        self.creates.lock().unwrap().push_back(result);
        self
    }

    pub fn push_complete(&self, result: Result<String, LlmError>) -> &Self {
        self.completes.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn completions(&self) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn create_conversation(&self, instructions: &str) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(Call::Create {
            instructions: instructions.to_string(),
        });
        match self.creates.lock().unwrap().pop_front() {
            Some(r) => r,
            None => {
                let n = self.next_conv.fetch_add(1, Ordering::SeqCst);
                Ok(format!("conv_auto_{}", n))
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Complete(request.clone()));
        self.completes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Hello there, traveler.".to_string()))
    }
}

/// Default config rooted in a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn test_config() -> (Config, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_string_lossy().into_owned();
    config.logging.file = None;
    config.callback.post_timeout_seconds = 2;
    (config, dir)
}

/// Serve the full router on an ephemeral port and return its base URL.
pub async fn spawn_server(state: slquest::server::AppState) -> String {
    let app = slquest::server::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A delivery received by [`spawn_receiver`]: the `token` query value and the body.
pub type Delivery = (Option<String>, String);

/// Throwaway in-world stand-in that records every callback POST.
pub async fn spawn_receiver() -> (String, tokio::sync::mpsc::UnboundedReceiver<Delivery>) {
    use axum::extract::Query;
    use std::collections::HashMap;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Delivery>();
    let app = axum::Router::new().route(
        "/cb",
        axum::routing::post(
            move |Query(q): Query<HashMap<String, String>>, body: String| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((q.get("token").cloned(), body));
                    "ok"
                }
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/cb", addr), rx)
}

pub async fn next_delivery(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("callback not delivered in time")
        .expect("receiver closed")
}
