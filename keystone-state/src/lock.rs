//! Lock guarding a state file against concurrent runs
//!
//! The lock file holds one `LockInfo` as JSON. It is created exclusively, so a
//! lock file that exists but does not parse belongs to a writer that has not
//! finished yet and is treated as held.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A web tier apply (load balancer and autoscaling group included) stays well under this
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 3600;

/// Command that holds the state lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOperation {
    Apply,
    Destroy,
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOperation::Apply => f.write_str("apply"),
            LockOperation::Destroy => f.write_str("destroy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    pub operation: LockOperation,
    /// user@host of the holder
    pub who: String,
    /// Process id of the holder, for finding a run that hangs
    pub pid: u32,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: LockOperation) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(operation: LockOperation, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            who: holder(),
            pid: std::process::id(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    /// Parse lock file content; `None` for a partially written or foreign file
    pub fn parse(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Whole minutes until a crashed holder's lock can be taken over
    pub fn minutes_remaining(&self) -> i64 {
        (self.expires - Utc::now()).num_minutes().max(0)
    }
}

fn holder() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host)
}
