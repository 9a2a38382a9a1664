use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{PresenceConfig, RuntimeConfig, MIN_PERIOD};
use crate::transport::{BrokerEndpoint, BrokerTransport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Initial connect or a due retry timer.
    ConnectRequested,
    /// Forced teardown and fresh attempt, e.g. after a config change.
    ReconnectRequested,
    Established,
    /// The attempt in flight errored or timed out.
    Failed(String),
    /// An established session closed, went offline or errored.
    Lost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    Teardown,
    ScheduleRetry,
}

/// Pure transition function of the connection state machine.
///
/// `target_ready` tells whether the broker address and port currently pass
/// validation; without it a connect request is deferred to the retry timer
/// and the state does not move.
pub fn transition(
    state: ConnectionState,
    event: &ConnectionEvent,
    target_ready: bool,
) -> (ConnectionState, Vec<Action>) {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (_, ReconnectRequested) if target_ready => (Connecting, vec![Action::Teardown, Action::Open]),
        (_, ReconnectRequested) => (Disconnected, vec![Action::Teardown, Action::ScheduleRetry]),
        (Disconnected, ConnectRequested) if target_ready => (Connecting, vec![Action::Open]),
        (Disconnected, ConnectRequested) => (Disconnected, vec![Action::ScheduleRetry]),
        (Connecting | Connected, ConnectRequested) => (state, Vec::new()),
        (Connecting | Connected, Established) => (Connected, Vec::new()),
        (Connecting | Connected, Failed(_) | Lost(_)) => {
            (Disconnected, vec![Action::Teardown, Action::ScheduleRetry])
        }
        (Disconnected, Established | Failed(_) | Lost(_)) => (Disconnected, Vec::new()),
    }
}

/// Where the presence monitor sends its messages.
pub trait Publisher {
    fn is_connected(&self) -> bool;
    /// Fire-and-forget: never fails towards the caller.
    fn publish(&mut self, topic: &str, payload: &str);
}

pub struct BrokerConnection<T: BrokerTransport> {
    transport: T,
    state: ConnectionState,
    retry_interval: Duration,
    connect_timeout: Duration,
    retry_at: Option<Instant>,
    connect_deadline: Option<Instant>,
    endpoint: Option<BrokerEndpoint>,
    attempts: u64,
}

impl<T: BrokerTransport> BrokerConnection<T> {
    pub fn new(transport: T, runtime: &RuntimeConfig) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            retry_interval: runtime.retry_interval.max(MIN_PERIOD),
            connect_timeout: runtime.connect_timeout.max(MIN_PERIOD),
            retry_at: None,
            connect_deadline: None,
            endpoint: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }

    pub fn connect(&mut self, config: &PresenceConfig) {
        self.handle(ConnectionEvent::ConnectRequested, config);
    }

    pub fn reconnect(&mut self, config: &PresenceConfig) {
        self.handle(ConnectionEvent::ReconnectRequested, config);
    }

    /// Closes the session and forgets any pending retry.
    pub fn shutdown(&mut self) {
        self.transport.close();
        self.retry_at = None;
        self.connect_deadline = None;
        if self.state != ConnectionState::Disconnected {
            info!(from = ?self.state, to = ?ConnectionState::Disconnected, "broker connection state");
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Single dispatch point for every connection event.
    pub fn handle(&mut self, event: ConnectionEvent, config: &PresenceConfig) {
        let endpoint = BrokerEndpoint::from_config(config);
        let (next, actions) = transition(self.state, &event, endpoint.is_some());

        match &event {
            ConnectionEvent::Failed(reason) => {
                warn!(endpoint = ?self.endpoint, reason = %reason, "broker connection attempt failed")
            }
            ConnectionEvent::Lost(reason) => {
                warn!(endpoint = ?self.endpoint, reason = %reason, "broker connection lost")
            }
            ConnectionEvent::ConnectRequested | ConnectionEvent::ReconnectRequested
                if endpoint.is_none() =>
            {
                debug!("broker target not configured, deferring connect")
            }
            _ => {}
        }

        if next != self.state {
            info!(from = ?self.state, to = ?next, "broker connection state");
        }
        self.state = next;

        for action in actions {
            match action {
                Action::Teardown => {
                    self.transport.close();
                    self.connect_deadline = None;
                }
                Action::ScheduleRetry => {
                    self.retry_at = Some(Instant::now() + self.retry_interval);
                }
                Action::Open => {
                    let Some(target) = endpoint.as_ref() else {
                        continue;
                    };
                    self.retry_at = None;
                    self.attempts += 1;
                    self.endpoint = Some(target.clone());
                    debug!(endpoint = %target, attempt = self.attempts, "connecting to broker");
                    match self.transport.open(target) {
                        Ok(()) => {
                            self.connect_deadline = Some(Instant::now() + self.connect_timeout);
                        }
                        Err(err) => {
                            self.handle(ConnectionEvent::Failed(err.to_string()), config);
                            return;
                        }
                    }
                }
            }
        }

        if self.state == ConnectionState::Connected {
            self.connect_deadline = None;
        }
    }

    /// Waits for the next transport event, connect deadline or retry timer.
    /// Safe to cancel: nothing is consumed until a branch completes.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let live = self.state != ConnectionState::Disconnected;
        let connecting = self.state == ConnectionState::Connecting;
        let deadline = self.connect_deadline.filter(|_| connecting);
        let retry_at = self.retry_at.filter(|_| !live);

        let event = tokio::select! {
            event = self.transport.next_event(), if live => match event {
                TransportEvent::Connected => ConnectionEvent::Established,
                TransportEvent::Closed(reason) if connecting => ConnectionEvent::Failed(reason),
                TransportEvent::Closed(reason) => ConnectionEvent::Lost(reason),
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                ConnectionEvent::Failed("connect timed out".to_string())
            }
            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                ConnectionEvent::ConnectRequested
            }
            else => std::future::pending::<ConnectionEvent>().await,
        };

        if event == ConnectionEvent::ConnectRequested {
            self.retry_at = None;
        }
        event
    }
}

impl<T: BrokerTransport> Publisher for BrokerConnection<T> {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn publish(&mut self, topic: &str, payload: &str) {
        if !self.is_connected() {
            debug!(topic = %topic, payload = %payload, "not connected, dropping publish");
            return;
        }
        debug!(topic = %topic, payload = %payload, "publishing");
        if let Err(err) = self.transport.publish(topic, payload) {
            error!(topic = %topic, error = %err, "error publishing mqtt message");
        }
    }
}
