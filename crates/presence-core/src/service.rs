use std::future::Future;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bridge::NotificationBridge;
use crate::broker::BrokerConnection;
use crate::config::{ConfigField, RuntimeConfig, MIN_PERIOD};
use crate::monitor::PresenceMonitor;
use crate::probe::Prober;
use crate::store::{ConfigError, ConfigStore};
use crate::transport::BrokerTransport;

/// The single logical actor: every tick, broker event and config request is
/// handled to completion before the next one is picked up.
pub struct PresenceService<T: BrokerTransport, P: Prober> {
    runtime: RuntimeConfig,
    store: ConfigStore,
    broker: BrokerConnection<T>,
    monitor: PresenceMonitor<P>,
    bridge: NotificationBridge,
}

impl<T: BrokerTransport, P: Prober> PresenceService<T, P> {
    pub fn new(
        runtime: RuntimeConfig,
        store: ConfigStore,
        transport: T,
        monitor: PresenceMonitor<P>,
        bridge: NotificationBridge,
    ) -> Self {
        let broker = BrokerConnection::new(transport, &runtime);
        Self {
            runtime,
            store,
            broker,
            monitor,
            bridge,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn broker(&self) -> &BrokerConnection<T> {
        &self.broker
    }

    pub fn is_config_valid(&self, keys: Option<&[ConfigField]>) -> bool {
        self.store.is_valid(keys)
    }

    /// Applies a partial config; a committed change forces a reconnect.
    pub fn apply_config(&mut self, patch: &Map<String, Value>) -> Result<bool, ConfigError> {
        let result = self.store.apply(patch);
        match &result {
            Ok(true) => {
                info!("config updated");
                debug!(
                    config = %serde_json::to_string(self.store.current()).unwrap_or_default(),
                    "with config"
                );
                self.broker.reconnect(self.store.current());
            }
            Ok(false) => debug!("config unchanged"),
            Err(err) => warn!(error = %err, "keeping last valid config"),
        }
        self.bridge.config_result(&result);
        result
    }

    async fn tick(&mut self) {
        let report = self.monitor.tick(self.store.current(), &mut self.broker).await;
        if let Some(report) = report {
            self.bridge.status(report.state);
        }
    }

    /// Runs until `shutdown` resolves. Requests arrive as config patches;
    /// a closed request channel leaves the service running.
    pub async fn run<F>(mut self, mut requests: mpsc::UnboundedReceiver<Map<String, Value>>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(instance = %self.runtime.instance, "starting presence service");
        self.broker.connect(self.store.current());

        let mut ticker = interval(self.runtime.tick_interval.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ready = interval(self.runtime.ready_interval.max(MIN_PERIOD));
        ready.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("shutdown requested, stopping");
                    break;
                }
                event = self.broker.next_event() => {
                    self.broker.handle(event, self.store.current());
                }
                request = requests.recv(), if requests_open => match request {
                    Some(patch) => {
                        let _ = self.apply_config(&patch);
                    }
                    None => {
                        debug!("config request channel closed");
                        requests_open = false;
                    }
                },
                _ = ticker.tick() => self.tick().await,
                _ = ready.tick() => self.bridge.ready(self.store.is_valid(None)),
            }
        }

        self.broker.shutdown();
        info!("presence service stopped");
    }
}
