use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::report::ProbeReport;

/// Grace period on top of ping's own deadline before the child is killed.
const SPAWN_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe target: {0:?}")]
    InvalidTarget(String),
    #[error("failed to run ping: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("probe timed out")]
    Timeout,
}

/// Reachability check for a single host. `Ok(false)` and `Err(_)` both mean
/// "not seen"; the error only carries the reason for logging.
#[async_trait]
pub trait Prober: Send {
    async fn probe(&mut self, target: &str) -> Result<bool, ProbeError>;
}

/// Shells out to the system `ping`, one echo request, bounded wait.
pub struct PingProber {
    program: String,
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "ping".to_string(),
            timeout,
        }
    }

    fn args(&self, target: &str) -> Vec<String> {
        let secs = self.timeout.as_secs().max(1).to_string();
        if cfg!(target_os = "windows") {
            let millis = self.timeout.as_millis().max(1).to_string();
            vec!["-n".into(), "1".into(), "-w".into(), millis, target.into()]
        } else if cfg!(target_os = "macos") {
            vec!["-c".into(), "1".into(), "-t".into(), secs, target.into()]
        } else {
            vec!["-c".into(), "1".into(), "-W".into(), secs, target.into()]
        }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&mut self, target: &str) -> Result<bool, ProbeError> {
        let target = target.trim();
        if target.is_empty() || target.starts_with('-') {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(self.timeout + SPAWN_SLACK, command.status()).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(err)) => Err(ProbeError::Spawn(err)),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

/// Runs one probe and records its outcome and round trip.
pub async fn measure<P: Prober>(prober: &mut P, target: &str) -> ProbeReport {
    let started = Instant::now();
    let outcome = prober.probe(target).await;
    let rtt = started.elapsed();

    let (alive, error) = match outcome {
        Ok(alive) => (alive, None),
        Err(err) => (false, Some(err.to_string())),
    };

    ProbeReport {
        ts: Utc::now(),
        target: target.to_string(),
        alive,
        rtt_ms: rtt.as_millis(),
        error,
    }
}
