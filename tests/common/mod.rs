//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fetchqueue::models::{EnqueueOptions, Payload, RunScope};
use fetchqueue::repository::{DbContext, DieselWorkStore};
use fetchqueue::work_queue::{JobHandler, RetryPolicy, WorkerConfig};

/// A fresh SQLite-backed store in a temp directory.
pub async fn setup_store() -> (DieselWorkStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::new(&dir.path().join("queue.db"));
    ctx.init_schema().await.unwrap();
    (ctx.work_store(), dir)
}

pub fn scope() -> RunScope {
    RunScope::new("run-1", "fetch")
}

pub fn payloads(n: usize) -> Vec<Payload> {
    (0..n)
        .map(|i| Payload::new(format!("https://example.gov/doc/{i}")))
        .collect()
}

pub async fn seed(store: &DieselWorkStore, n: usize, max_attempts: u32) {
    store
        .enqueue(
            &scope(),
            &payloads(n),
            EnqueueOptions {
                max_attempts,
                priority: 0,
            },
        )
        .await
        .unwrap();
}

/// Worker config with short intervals so tests finish quickly.
pub fn fast_config(batch_size: u32) -> WorkerConfig {
    let mut config = WorkerConfig::new(scope());
    config.batch_size = batch_size;
    config.poll_interval = Duration::from_millis(10);
    config.retry = RetryPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
        max_failures: 3,
    };
    config
}

/// Records every URL it processes. Optionally fails URLs containing a marker.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<String>>>,
    pub fail_marker: Option<&'static str>,
    pub delay: Option<Duration>,
    pub teardowns: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn process(&self, payload: &Payload) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(payload.url.clone());
        if let Some(marker) = self.fail_marker {
            if payload.url.contains(marker) {
                anyhow::bail!("refused {}", payload.url);
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails every payload.
pub struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn process(&self, _payload: &Payload) -> anyhow::Result<()> {
        anyhow::bail!("connection reset")
    }
}
