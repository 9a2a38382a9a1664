//! In-memory stand-ins for the broker transport, the prober and the
//! publisher, shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::broker::Publisher;
use crate::probe::{ProbeError, Prober};
use crate::transport::{BrokerEndpoint, BrokerTransport, TransportError, TransportEvent};

#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    pub opened: Vec<BrokerEndpoint>,
    pub closed: usize,
    pub live: usize,
    pub max_live: usize,
    pub published: Vec<(String, String)>,
    pub events: VecDeque<TransportEvent>,
}

impl TransportLog {
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

pub(crate) struct FakeTransport {
    log: Arc<Mutex<TransportLog>>,
    open: bool,
    auto_connect: bool,
    refuse_open: bool,
}

impl FakeTransport {
    pub fn new() -> (Self, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        let transport = Self {
            log: log.clone(),
            open: false,
            auto_connect: false,
            refuse_open: false,
        };
        (transport, log)
    }

    /// Every opened session reports a successful connect right away.
    pub fn auto_connecting() -> (Self, Arc<Mutex<TransportLog>>) {
        let (mut transport, log) = Self::new();
        transport.auto_connect = true;
        (transport, log)
    }

    pub fn refusing() -> (Self, Arc<Mutex<TransportLog>>) {
        let (mut transport, log) = Self::new();
        transport.refuse_open = true;
        (transport, log)
    }
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    fn open(&mut self, endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        if self.refuse_open {
            return Err(TransportError::Other("connection refused".to_string()));
        }
        let mut log = self.log.lock().expect("transport log");
        log.opened.push(endpoint.clone());
        log.live += 1;
        log.max_live = log.max_live.max(log.live);
        if self.auto_connect {
            log.events.push_back(TransportEvent::Connected);
        }
        self.open = true;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let next = self.log.lock().expect("transport log").events.pop_front();
        match next {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.log
            .lock()
            .expect("transport log")
            .published
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.log.lock().expect("transport log");
        log.closed += 1;
        if self.open {
            log.live -= 1;
            log.events.clear();
            self.open = false;
        }
    }
}

/// Replays scripted probe outcomes, then reports the target unreachable.
pub(crate) struct ScriptedProber {
    script: VecDeque<Result<bool, ProbeError>>,
}

impl ScriptedProber {
    pub fn new(script: Vec<Result<bool, ProbeError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&mut self, _target: &str) -> Result<bool, ProbeError> {
        self.script.pop_front().unwrap_or(Ok(false))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    pub connected: bool,
    pub messages: Vec<(String, String)>,
}

impl RecordingPublisher {
    pub fn connected() -> Self {
        Self {
            connected: true,
            messages: Vec::new(),
        }
    }

    pub fn payloads(&self, topic: &str) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.as_str())
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &str) {
        if self.connected {
            self.messages.push((topic.to_string(), payload.to_string()));
        }
    }
}
