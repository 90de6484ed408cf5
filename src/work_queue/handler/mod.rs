//! Domain handlers: the "process one payload" capability workers drive.
//!
//! A handler is built per worker from a factory registered for its job type.
//! Built-in handlers are the closed [`HandlerKind`] set selected in config;
//! library users can register their own.

mod command;
mod http;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

pub use command::CommandHandler;
pub use http::HttpHandler;

use super::WorkQueueError;
use crate::models::{ItemOutcome, Payload};

/// Processes one payload. `Err` means the item failed and may be retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Acquire resources before the first item.
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(&self, payload: &Payload) -> anyhow::Result<()>;

    /// Release resources. Runs on every stop, including error exits.
    async fn teardown(&mut self) {}
}

/// Run a handler on one payload, turning errors and panics into a failed
/// outcome carrying their text.
pub async fn run_handler(handler: &dyn JobHandler, payload: &Payload) -> ItemOutcome {
    match AssertUnwindSafe(handler.process(payload)).catch_unwind().await {
        Ok(Ok(())) => ItemOutcome::Completed,
        Ok(Err(e)) => ItemOutcome::failed(format!("{e:#}")),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ItemOutcome::failed(format!("handler panicked: {message}"))
        }
    }
}

/// Builds a fresh handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn JobHandler> + Send + Sync>;

/// Job type → handler factory.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a job type.
    pub fn register<F>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn JobHandler> + Send + Sync + 'static,
    {
        self.factories.insert(job_type.into(), Arc::new(factory));
    }

    /// Register a built-in handler for a job type.
    pub fn register_kind(&mut self, job_type: impl Into<String>, kind: HandlerKind) {
        self.register(job_type, move || kind.build());
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Build a handler for `job_type`. Unknown job types are an error.
    pub fn create(&self, job_type: &str) -> Result<Box<dyn JobHandler>, WorkQueueError> {
        self.factories
            .get(job_type)
            .map(|factory| factory())
            .ok_or_else(|| WorkQueueError::UnknownJobType(job_type.to_string()))
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("fetchqueue/{}", env!("CARGO_PKG_VERSION"))
}

/// Built-in handlers, selected by `kind` in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerKind {
    /// GET the URL; any 2xx response is a success.
    Http {
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_user_agent")]
        user_agent: String,
    },
    /// Run a program with the URL as its last argument and the payload JSON
    /// on stdin; exit status 0 is a success.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Default for HandlerKind {
    fn default() -> Self {
        HandlerKind::Http {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HandlerKind {
    pub fn build(&self) -> Box<dyn JobHandler> {
        match self {
            HandlerKind::Http {
                timeout_secs,
                user_agent,
            } => Box::new(HttpHandler::new(
                Duration::from_secs(*timeout_secs),
                user_agent.clone(),
            )),
            HandlerKind::Command {
                program,
                args,
                timeout_secs,
            } => Box::new(CommandHandler::new(
                program.clone(),
                args.clone(),
                timeout_secs.map(Duration::from_secs),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Http { .. } => "http",
            HandlerKind::Command { .. } => "command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn process(&self, _payload: &Payload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = HandlerRegistry::new();
        registry.register("noop", || Box::new(Noop));
        registry.register_kind("fetch", HandlerKind::default());

        assert_eq!(registry.job_types(), vec!["fetch", "noop"]);
        let handler = registry.create("noop").unwrap();
        handler
            .process(&Payload::new("https://example.gov/"))
            .await
            .unwrap();

        assert!(matches!(
            registry.create("missing"),
            Err(WorkQueueError::UnknownJobType(t)) if t == "missing"
        ));
    }

    struct Panicky;

    #[async_trait]
    impl JobHandler for Panicky {
        async fn process(&self, payload: &Payload) -> anyhow::Result<()> {
            if payload.url.ends_with("/err") {
                anyhow::bail!("HTTP 500");
            }
            panic!("cannot handle {}", payload.url);
        }
    }

    #[tokio::test]
    async fn test_run_handler_captures_errors_and_panics() {
        let outcome = run_handler(&Noop, &Payload::new("https://example.gov/")).await;
        assert!(outcome.is_success());

        let outcome = run_handler(&Panicky, &Payload::new("https://example.gov/err")).await;
        assert_eq!(outcome, ItemOutcome::failed("HTTP 500"));

        let outcome = run_handler(&Panicky, &Payload::new("https://example.gov/p")).await;
        assert_eq!(
            outcome,
            ItemOutcome::failed("handler panicked: cannot handle https://example.gov/p")
        );
    }

    #[test]
    fn test_handler_kind_from_toml() {
        let kind: HandlerKind = toml::from_str(
            r#"
            kind = "command"
            program = "wget"
            args = ["-q"]
            "#,
        )
        .unwrap();
        assert_eq!(kind.name(), "command");
        assert!(matches!(kind, HandlerKind::Command { ref args, .. } if args == &["-q"]));

        let kind: HandlerKind = toml::from_str(r#"kind = "http""#).unwrap();
        assert!(matches!(kind, HandlerKind::Http { timeout_secs: 30, .. }));
    }
}
