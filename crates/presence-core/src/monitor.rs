use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::Publisher;
use crate::config::PresenceConfig;
use crate::probe::Prober;
use crate::report::TickReport;

pub const HEARTBEAT_PAYLOAD: &str = "ON";
pub const LEDS_ABSENT_COMMAND: &str = "PL=1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceState {
    #[serde(rename = "ON")]
    Present,
    #[serde(rename = "OFF")]
    Absent,
    #[serde(rename = "IDLE")]
    Uncertain,
}

impl PresenceState {
    pub fn payload(self) -> &'static str {
        match self {
            PresenceState::Present => "ON",
            PresenceState::Absent => "OFF",
            PresenceState::Uncertain => "IDLE",
        }
    }

    pub fn is_stable(self) -> bool {
        self != PresenceState::Uncertain
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.payload())
    }
}

/// Debounce rule: a success is PRESENT; a failure is UNCERTAIN until
/// `wait_secs` have passed since the last success, then ABSENT.
pub fn evaluate(alive: bool, now: i64, last_seen: i64, wait_secs: i64) -> PresenceState {
    if alive {
        return PresenceState::Present;
    }
    if now - last_seen < wait_secs {
        PresenceState::Uncertain
    } else {
        PresenceState::Absent
    }
}

/// Messages for one tick's fan-out, per topic role. A topic holding several
/// roles gets one message for each of them.
pub fn fanout(config: &PresenceConfig, state: PresenceState) -> Vec<(String, &'static str)> {
    let leds = config.leds_topic.as_deref();
    let scenario = config.scenario_topic.as_deref();
    let targets = config.target_topics.as_deref().unwrap_or_default();

    let mut out = Vec::new();
    for topic in config.fanout_topics() {
        let mut payloads: Vec<&'static str> = Vec::new();
        if leds == Some(topic) && state == PresenceState::Absent {
            payloads.push(LEDS_ABSENT_COMMAND);
        }
        if scenario == Some(topic) {
            payloads.push(state.payload());
        }
        if targets.iter().any(|t| t == topic) && state.is_stable() {
            payloads.push(state.payload());
        }
        out.extend(payloads.into_iter().map(|p| (topic.to_string(), p)));
    }
    out
}

/// Wall clock in UNIX seconds.
pub type Clock = Box<dyn Fn() -> i64 + Send>;

pub struct PresenceMonitor<P: Prober> {
    prober: P,
    clock: Clock,
    state: PresenceState,
    last_seen: Option<i64>,
    ticks: u64,
    probes_ok: u64,
    probes_failed: u64,
}

impl<P: Prober> PresenceMonitor<P> {
    pub fn new(prober: P) -> Self {
        Self::with_clock(prober, Box::new(|| Utc::now().timestamp()))
    }

    pub fn with_clock(prober: P, clock: Clock) -> Self {
        Self {
            prober,
            clock,
            state: PresenceState::Absent,
            last_seen: None,
            ticks: 0,
            probes_ok: 0,
            probes_failed: 0,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn last_seen(&self) -> Option<i64> {
        self.last_seen
    }

    /// One polling round. Skipped (returns `None`) while the publisher is
    /// not connected; the target is not probed in that case.
    pub async fn tick<S: Publisher>(
        &mut self,
        config: &PresenceConfig,
        sink: &mut S,
    ) -> Option<TickReport> {
        if !sink.is_connected() {
            debug!("broker not connected, skipping tick");
            return None;
        }

        if let Some(topic) = config.monitor_topic.as_deref() {
            sink.publish(topic, HEARTBEAT_PAYLOAD);
        }

        let alive = match config.ping_target.as_deref() {
            Some(target) => match self.prober.probe(target).await {
                Ok(alive) => alive,
                Err(err) => {
                    debug!(target = %target, error = %err, "probe failed");
                    false
                }
            },
            None => false,
        };

        let now = (self.clock)();
        Some(self.observe(alive, now, config, sink))
    }

    /// Folds a probe result taken at `now` (UNIX seconds) into the presence
    /// state and publishes the fan-out.
    pub fn observe<S: Publisher>(
        &mut self,
        alive: bool,
        now: i64,
        config: &PresenceConfig,
        sink: &mut S,
    ) -> TickReport {
        self.ticks += 1;
        let last_seen = *self.last_seen.get_or_insert(now);
        let elapsed = now - last_seen;
        let previous = self.state;
        let state = evaluate(alive, now, last_seen, config.wait_secs());

        if alive {
            self.probes_ok += 1;
            self.last_seen = Some(last_seen.max(now));
        } else {
            self.probes_failed += 1;
        }

        let changed = state != previous;
        if changed {
            info!(state = %state, previous = %previous, elapsed_secs = elapsed, "detected presence change");
        } else {
            debug!(
                state = %state,
                elapsed_secs = elapsed,
                tick = self.ticks,
                probes_ok = self.probes_ok,
                probes_failed = self.probes_failed,
                "detected presence"
            );
        }

        let messages = fanout(config, state);
        for (topic, payload) in &messages {
            sink.publish(topic, payload);
        }
        self.state = state;

        TickReport {
            now,
            alive,
            state,
            previous,
            changed,
            last_seen: self.last_seen.unwrap_or(now),
            elapsed_secs: if alive { 0 } else { elapsed },
            published: messages.len(),
        }
    }
}
