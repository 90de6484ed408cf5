//! Worker identity.

/// Build an owner id of the form `host:pid:random8`.
///
/// Unique per process start, so a restarted worker never inherits the
/// claims of its previous incarnation.
pub fn worker_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}:{}:{}", host, std::process::id(), &suffix[..8])
}
