//! Work item models: the unit of distributable fetch work.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Lifecycle status of a work item.
///
/// `Pending` and `Claimed` are transient; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Errors raised while building payloads from user input.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid payload on line {line}: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The content of a work item: a URL plus optional metadata.
///
/// Opaque to the store apart from its content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub url: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check that the URL is absolute and parseable.
    pub fn validate(&self) -> Result<(), PayloadError> {
        url::Url::parse(&self.url)
            .map(|_| ())
            .map_err(|e| PayloadError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            })
    }

    /// Parse one line of a payload source.
    ///
    /// Accepts a bare URL or a JSON payload object. Blank lines and `#`
    /// comments yield `None`. `line_no` is 1-based and only used for errors.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Self>, PayloadError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let payload = if trimmed.starts_with('{') {
            serde_json::from_str::<Payload>(trimmed).map_err(|source| {
                PayloadError::InvalidJson {
                    line: line_no,
                    source,
                }
            })?
        } else {
            Payload::new(trimmed)
        };

        payload.validate()?;
        Ok(Some(payload))
    }

    /// Canonical JSON form, with metadata keys sorted.
    pub fn to_canonical_json(&self) -> String {
        let sorted: BTreeMap<&String, &serde_json::Value> = self.metadata.iter().collect();
        let value = serde_json::json!({ "url": self.url, "metadata": sorted });
        value.to_string()
    }

    /// Stable deduplication hash of this payload (hex SHA-256).
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Serialized form stored in the `payload` column.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_canonical_json())
    }

    /// Parse a stored payload, falling back to treating the text as a bare URL.
    pub fn from_stored(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Payload::new(raw))
    }
}

/// A unit of distributable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub run_id: String,
    pub job_type: String,
    pub payload: Payload,
    pub content_key: String,
    pub status: ItemStatus,
    /// Worker currently holding the claim (set only while `Claimed`).
    pub owner: Option<String>,
    /// Time of the most recent claim (set only while `Claimed`).
    pub claimed_at: Option<DateTime<Utc>>,
    /// Number of claims so far, including the current one.
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub priority: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Token of the claim this copy of the item was handed out under.
    pub fn claim_token(&self) -> ClaimToken {
        ClaimToken {
            item_id: self.id,
            attempt: self.attempt_count,
        }
    }
}

/// Identifies one claim of one item.
///
/// Every claim bumps `attempt_count`, so the attempt number tells a current
/// claim apart from an earlier expired one, even under the same owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimToken {
    pub item_id: i64,
    pub attempt: u32,
}

impl ClaimToken {
    pub(crate) fn attempt_column(&self) -> i32 {
        self.attempt.min(i32::MAX as u32) as i32
    }
}

/// Result of a single item's processing, as reported to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Failed { error: String },
}

impl ItemOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// What `report_outcome` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportResult {
    /// The item is now `completed`.
    Completed,
    /// The failure was recorded and the item went back to `pending`.
    Requeued,
    /// The failure exhausted the attempt budget; the item is now `failed`.
    Failed,
    /// The caller no longer holds the claim; nothing was changed.
    StaleClaim,
}

/// Per-call settings for `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Retry ceiling stamped on every inserted item.
    pub max_attempts: u32,
    /// Higher values are claimed first.
    pub priority: i32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            priority: 0,
        }
    }
}

/// Counts returned by `enqueue`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub inserted: u64,
    /// Payloads whose content key already existed in the run.
    pub skipped: u64,
}

/// Counts returned by lease sweeps and claim releases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSweep {
    pub requeued: u64,
    pub failed: u64,
}

impl LeaseSweep {
    pub fn total(&self) -> u64 {
        self.requeued + self.failed
    }
}

/// Per-status item counts for one `(run_id, job_type)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    /// `pending + claimed`.
    pub remaining: u64,
}

impl QueueStats {
    /// Build stats from a `status -> count` map. Unknown statuses are ignored.
    pub fn from_counts(counts: &HashMap<String, u64>) -> Self {
        let get = |status: ItemStatus| counts.get(status.as_str()).copied().unwrap_or(0);
        let pending = get(ItemStatus::Pending);
        let claimed = get(ItemStatus::Claimed);
        Self {
            pending,
            claimed,
            completed: get(ItemStatus::Completed),
            failed: get(ItemStatus::Failed),
            remaining: pending + claimed,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.completed + self.failed
    }

    /// No pending or claimed items remain.
    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_ignores_metadata_order() {
        let a = Payload::new("https://example.gov/a")
            .with_metadata("agency", serde_json::json!("doj"))
            .with_metadata("page", serde_json::json!(3));
        let b = Payload::new("https://example.gov/a")
            .with_metadata("page", serde_json::json!(3))
            .with_metadata("agency", serde_json::json!("doj"));
        assert_eq!(a.content_key(), b.content_key());
        assert_eq!(a.content_key().len(), 64);
    }

    #[test]
    fn test_content_key_differs_by_url_and_metadata() {
        let a = Payload::new("https://example.gov/a");
        let b = Payload::new("https://example.gov/b");
        let c = Payload::new("https://example.gov/a").with_metadata("x", serde_json::json!(1));
        assert_ne!(a.content_key(), b.content_key());
        assert_ne!(a.content_key(), c.content_key());
    }

    #[test]
    fn test_parse_line() {
        assert!(Payload::parse_line("   ", 1).unwrap().is_none());
        assert!(Payload::parse_line("# comment", 2).unwrap().is_none());

        let bare = Payload::parse_line(" https://example.gov/doc.pdf ", 3)
            .unwrap()
            .unwrap();
        assert_eq!(bare.url, "https://example.gov/doc.pdf");
        assert!(bare.metadata.is_empty());

        let json = Payload::parse_line(
            r#"{"url": "https://example.gov/x", "metadata": {"id": 7}}"#,
            4,
        )
        .unwrap()
        .unwrap();
        assert_eq!(json.metadata.get("id"), Some(&serde_json::json!(7)));

        assert!(matches!(
            Payload::parse_line("not a url", 5),
            Err(PayloadError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Payload::parse_line("{\"url\": ", 6),
            Err(PayloadError::InvalidJson { line: 6, .. })
        ));
    }

    #[test]
    fn test_stored_payload_round_trip() {
        let p = Payload::new("https://example.gov/a").with_metadata("k", serde_json::json!("v"));
        assert_eq!(Payload::from_stored(&p.to_json()), p);
        assert_eq!(
            Payload::from_stored("https://legacy.example/raw"),
            Payload::new("https://legacy.example/raw")
        );
    }

    #[test]
    fn test_queue_stats_from_counts() {
        let mut counts = HashMap::new();
        counts.insert("pending".to_string(), 3);
        counts.insert("claimed".to_string(), 2);
        counts.insert("completed".to_string(), 5);
        counts.insert("failed".to_string(), 1);
        let stats = QueueStats::from_counts(&counts);
        assert_eq!(stats.remaining, 5);
        assert_eq!(stats.total(), 11);
        assert!(!stats.is_drained());
        assert!(QueueStats::default().is_drained());
    }
}
