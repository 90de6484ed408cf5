//! Run models: the execution scope that groups work items.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a job type is executed when a run is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Process every payload in the calling process; nothing touches the store.
    Local,
    /// Seed the shared store and let independent workers drain it.
    #[default]
    Distributed,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Distributed => "distributed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "distributed" => Some(Self::Distributed),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(run_id, job_type)` pair every store query is scoped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunScope {
    pub run_id: String,
    pub job_type: String,
}

impl RunScope {
    pub fn new(run_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            job_type: job_type.into(),
        }
    }

    /// Generate a fresh run identifier: a sortable timestamp plus a random suffix.
    pub fn generate_run_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.job_type)
    }
}

/// A registered run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub job_type: String,
    pub mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, job_type: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            run_id: run_id.into(),
            job_type: job_type.into(),
            mode,
            created_at: Utc::now(),
        }
    }

    pub fn scope(&self) -> RunScope {
        RunScope::new(&self.run_id, &self.job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_run_ids_are_unique() {
        let a = RunScope::generate_run_id();
        let b = RunScope::generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 14 + 1 + 8);
    }

    #[test]
    fn test_execution_mode_round_trip() {
        for mode in [ExecutionMode::Local, ExecutionMode::Distributed] {
            assert_eq!(ExecutionMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(ExecutionMode::from_str("remote"), None);
    }
}
