use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::PresenceState;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub ts: DateTime<Utc>,
    pub target: String,
    pub alive: bool,
    pub rtt_ms: u128,
    pub error: Option<String>,
}

/// Outcome of one monitor tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub now: i64,
    pub alive: bool,
    pub state: PresenceState,
    pub previous: PresenceState,
    pub changed: bool,
    pub last_seen: i64,
    pub elapsed_secs: i64,
    pub published: usize,
}
