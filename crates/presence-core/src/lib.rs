pub mod bridge;
pub mod broker;
pub mod config;
pub mod monitor;
pub mod probe;
pub mod report;
pub mod service;
pub mod store;
pub mod transport;
pub mod validate;

#[cfg(test)]
mod testing;

pub use bridge::{parse_request, BridgeError, Notification, NotificationBridge};
pub use broker::{BrokerConnection, ConnectionEvent, ConnectionState, Publisher};
pub use config::{ConfigField, PresenceConfig, RuntimeConfig};
pub use monitor::{PresenceMonitor, PresenceState};
pub use probe::{PingProber, ProbeError, Prober};
pub use report::{ProbeReport, TickReport};
pub use service::PresenceService;
pub use store::{ConfigError, ConfigStore};
pub use transport::{BrokerEndpoint, BrokerTransport, MqttTransport, TransportError, TransportEvent};
