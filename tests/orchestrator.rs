//! Orchestrator: local and distributed runs, progress and sweeps.

mod common;

use std::sync::Arc;
use std::time::Duration;

use fetchqueue::config::Config;
use fetchqueue::models::{ExecutionMode, Payload, RunScope};
use fetchqueue::orchestrator::{Orchestrator, StartedRun};
use fetchqueue::work_queue::{JobHandler, Worker, WorkerConfig, WorkQueueError};

use common::{payloads, setup_store, RecordingHandler};

const CONFIG: &str = r#"
[worker]
poll_interval_ms = 10

[jobs.fetch]
mode = "distributed"
max_attempts = 2
priority = 5

[jobs.check]
mode = "local"
max_attempts = 3
concurrency = 2
"#;

fn config() -> Config {
    Config::parse(CONFIG, "toml").unwrap()
}

#[tokio::test]
async fn test_distributed_run_seeds_without_processing() {
    let (store, _dir) = setup_store().await;
    let mut orchestrator = Orchestrator::new(config(), store.clone());
    let handler = RecordingHandler::default();
    let factory_handler = handler.clone();
    orchestrator.register("fetch", move || -> Box<dyn JobHandler> {
        Box::new(factory_handler.clone())
    });

    let started = orchestrator
        .start_run("fetch", &payloads(4), Some("nightly".into()))
        .await
        .unwrap();
    assert_eq!(started.mode(), ExecutionMode::Distributed);
    assert_eq!(started.run_id(), "nightly");
    match started {
        StartedRun::Distributed(receipt) => {
            assert_eq!(receipt.enqueued, 4);
            assert_eq!(receipt.skipped, 0);
        }
        other => panic!("expected a distributed run, got {:?}", other),
    }
    assert!(handler.seen().is_empty());

    let progress = orchestrator.get_progress("nightly", "fetch").await.unwrap();
    assert_eq!(progress.pending, 4);

    let run = store
        .get_run(&RunScope::new("nightly", "fetch"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.mode, ExecutionMode::Distributed);

    let items = store.list_items(&RunScope::new("nightly", "fetch")).await.unwrap();
    assert!(items.iter().all(|i| i.max_attempts == 2 && i.priority == 5));
}

#[tokio::test]
async fn test_reseeding_adds_only_new_payloads() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store.clone());

    orchestrator
        .start_run("fetch", &payloads(3), Some("r1".into()))
        .await
        .unwrap();
    let again = orchestrator
        .start_run("fetch", &payloads(5), Some("r1".into()))
        .await
        .unwrap();

    match again {
        StartedRun::Distributed(receipt) => {
            assert_eq!(receipt.enqueued, 2);
            assert_eq!(receipt.skipped, 3);
        }
        other => panic!("expected a distributed run, got {:?}", other),
    }
    assert_eq!(orchestrator.list_runs(10).await.unwrap().len(), 1);
    assert_eq!(
        orchestrator.get_progress("r1", "fetch").await.unwrap().total(),
        5
    );
}

#[tokio::test]
async fn test_generated_run_ids_keep_runs_apart() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store);

    let a = orchestrator.start_run("fetch", &payloads(2), None).await.unwrap();
    let b = orchestrator.start_run("fetch", &payloads(2), None).await.unwrap();
    assert_ne!(a.run_id(), b.run_id());

    assert_eq!(orchestrator.list_runs(10).await.unwrap().len(), 2);
    for started in [&a, &b] {
        let progress = orchestrator
            .get_progress(started.run_id(), "fetch")
            .await
            .unwrap();
        assert_eq!(progress.pending, 2);
    }
}

#[tokio::test]
async fn test_local_run_never_touches_the_store() {
    let (store, _dir) = setup_store().await;
    let mut orchestrator = Orchestrator::new(config(), store.clone());
    let handler = RecordingHandler {
        fail_marker: Some("/doc/1"),
        ..Default::default()
    };
    let factory_handler = handler.clone();
    orchestrator.register("check", move || -> Box<dyn JobHandler> {
        Box::new(factory_handler.clone())
    });

    let mut input = payloads(3);
    input.push(Payload::new("https://example.gov/doc/0"));

    let started = orchestrator
        .start_run("check", &input, Some("local-1".into()))
        .await
        .unwrap();
    let report = match started {
        StartedRun::Local(report) => report,
        other => panic!("expected a local run, got {:?}", other),
    };

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failures[0].url, "https://example.gov/doc/1");
    assert_eq!(report.failures[0].attempts, 3);

    // Two successes plus three attempts of the failing payload.
    assert_eq!(handler.seen().len(), 5);

    assert!(orchestrator.list_runs(10).await.unwrap().is_empty());
    let progress = orchestrator.get_progress("local-1", "check").await.unwrap();
    assert_eq!(progress.total(), 0);
}

#[tokio::test]
async fn test_unknown_job_type_is_rejected() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store);

    let err = orchestrator
        .start_run("nope", &payloads(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkQueueError::UnknownJobType(ref t) if t == "nope"));
    assert!(orchestrator.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_payload_rejects_the_whole_run() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store);

    let mut input = payloads(2);
    input.push(Payload::new("not a url"));
    let err = orchestrator.start_run("fetch", &input, None).await.unwrap_err();
    assert!(matches!(err, WorkQueueError::Payload(_)));
    assert!(orchestrator.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_seeded_run_drained_by_worker_then_reported() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store.clone());
    orchestrator
        .start_run("fetch", &payloads(6), Some("r2".into()))
        .await
        .unwrap();

    let scope = RunScope::new("r2", "fetch");
    let job = orchestrator.config().job("fetch").unwrap();
    let config = WorkerConfig::from_settings(scope.clone(), job, &orchestrator.config().worker);
    let handler = RecordingHandler {
        fail_marker: Some("/doc/5"),
        ..Default::default()
    };
    Worker::new(Arc::new(store.clone()), Box::new(handler), config)
        .run()
        .await
        .unwrap();

    let progress = orchestrator.get_progress("r2", "fetch").await.unwrap();
    assert_eq!(progress.completed, 5);
    assert_eq!(progress.failed, 1);
    assert!(progress.is_drained());

    let failures = orchestrator.failures(&scope, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempt_count, 2);
}

#[tokio::test]
async fn test_sweep_recovers_abandoned_claims() {
    let (store, _dir) = setup_store().await;
    let orchestrator = Orchestrator::new(config(), store.clone());
    orchestrator
        .start_run("fetch", &payloads(3), Some("r3".into()))
        .await
        .unwrap();

    let scope = RunScope::new("r3", "fetch");
    store.claim_batch(&scope, "gone", 3).await.unwrap();

    let early = orchestrator
        .sweep(Duration::from_secs(300), None)
        .await
        .unwrap();
    assert_eq!(early.total(), 0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let swept = orchestrator
        .sweep(Duration::from_millis(10), Some(&scope))
        .await
        .unwrap();
    assert_eq!(swept.requeued, 3);
    assert_eq!(orchestrator.get_progress("r3", "fetch").await.unwrap().pending, 3);
}
