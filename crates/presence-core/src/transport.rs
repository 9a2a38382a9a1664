use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{ConfigField, PresenceConfig};
use crate::validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// `None` while the broker fields are missing, blank, or the port does
    /// not fit a TCP port.
    pub fn from_config(config: &PresenceConfig) -> Option<Self> {
        if !validate::validate_all(config, Some(ConfigField::BROKER)) {
            return None;
        }
        let host = config.broker_address.as_deref()?.trim().to_string();
        let port = u16::try_from(config.broker_port?).ok()?;
        Some(Self { host, port })
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Closed(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no open session")]
    NotOpen,
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// One outbound broker session at a time.
///
/// `open` starts a connection attempt and returns immediately; the outcome
/// arrives later through `next_event`. `next_event` never resolves while no
/// session is open.
#[async_trait]
pub trait BrokerTransport: Send {
    fn open(&mut self, endpoint: &BrokerEndpoint) -> Result<(), TransportError>;
    async fn next_event(&mut self) -> TransportEvent;
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError>;
    fn close(&mut self);
}

struct MqttSession {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    pump: JoinHandle<()>,
}

pub struct MqttTransport {
    client_id: String,
    keep_alive: Duration,
    session: Option<MqttSession>,
}

impl MqttTransport {
    pub fn new(instance: &str, keep_alive: Duration) -> Self {
        Self {
            client_id: format!("scenarioMonitor_{}_{}", instance, Uuid::new_v4().simple()),
            keep_alive,
            session: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Forwards connection outcomes from the rumqttc event loop. Stops after the
/// first close so rumqttc never reconnects on its own.
async fn pump_events(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    TransportEvent::Connected
                } else {
                    TransportEvent::Closed(format!("connection refused: {:?}", ack.code))
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                TransportEvent::Closed("broker sent disconnect".to_string())
            }
            Ok(other) => {
                trace!(?other, "mqtt event");
                continue;
            }
            Err(err) => TransportEvent::Closed(err.to_string()),
        };

        let closed = matches!(event, TransportEvent::Closed(_));
        if tx.send(event).is_err() || closed {
            break;
        }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    fn open(&mut self, endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        self.close();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| TransportError::Other(err.to_string()))?;

        let mut options = MqttOptions::new(&self.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, 10);
        let (tx, events) = mpsc::unbounded_channel();
        let pump = runtime.spawn(pump_events(eventloop, tx));

        debug!(client_id = %self.client_id, endpoint = %endpoint, "opened mqtt session");
        self.session = Some(MqttSession { client, events, pump });
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.session.as_mut() {
            Some(session) => match session.events.recv().await {
                Some(event) => event,
                None => TransportEvent::Closed("event loop stopped".to_string()),
            },
            None => std::future::pending().await,
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let Some(session) = self.session.as_ref() else {
            return Err(TransportError::NotOpen);
        };
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|err| TransportError::Rejected(err.to_string()))
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.pump.abort();
            drop(session.client);
            debug!(client_id = %self.client_id, "closed mqtt session");
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.close();
    }
}
