use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::validate;

/// Keys recognised in configuration patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigField {
    BrokerAddress,
    BrokerPort,
    PingTarget,
    WaitTime,
    MonitorTopic,
    LedsTopic,
    ScenarioTopic,
    TargetTopics,
}

impl ConfigField {
    pub const ALL: &'static [ConfigField] = &[
        ConfigField::BrokerAddress,
        ConfigField::BrokerPort,
        ConfigField::PingTarget,
        ConfigField::WaitTime,
        ConfigField::MonitorTopic,
        ConfigField::LedsTopic,
        ConfigField::ScenarioTopic,
        ConfigField::TargetTopics,
    ];

    pub const BROKER: &'static [ConfigField] = &[ConfigField::BrokerAddress, ConfigField::BrokerPort];

    pub fn key(self) -> &'static str {
        match self {
            ConfigField::BrokerAddress => "brokerAddress",
            ConfigField::BrokerPort => "brokerPort",
            ConfigField::PingTarget => "pingTarget",
            ConfigField::WaitTime => "waitTime",
            ConfigField::MonitorTopic => "monitorTopic",
            ConfigField::LedsTopic => "ledsTopic",
            ConfigField::ScenarioTopic => "scenarioTopic",
            ConfigField::TargetTopics => "targetTopics",
        }
    }

    /// Resolves a patch key, including the short `broker`/`port` spellings.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "brokerAddress" | "broker" => Some(ConfigField::BrokerAddress),
            "brokerPort" | "port" => Some(ConfigField::BrokerPort),
            "pingTarget" => Some(ConfigField::PingTarget),
            "waitTime" => Some(ConfigField::WaitTime),
            "monitorTopic" => Some(ConfigField::MonitorTopic),
            "ledsTopic" => Some(ConfigField::LedsTopic),
            "scenarioTopic" => Some(ConfigField::ScenarioTopic),
            "targetTopics" => Some(ConfigField::TargetTopics),
            _ => None,
        }
    }

    pub fn is_optional(self) -> bool {
        matches!(self, ConfigField::LedsTopic | ConfigField::ScenarioTopic)
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The process-wide monitoring configuration. `None` means the key was
/// never supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceConfig {
    pub broker_address: Option<String>,
    pub broker_port: Option<i64>,
    pub ping_target: Option<String>,
    pub wait_time: Option<i64>,
    pub monitor_topic: Option<String>,
    pub leds_topic: Option<String>,
    pub scenario_topic: Option<String>,
    pub target_topics: Option<Vec<String>>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            broker_address: None,
            broker_port: Some(1883),
            ping_target: None,
            wait_time: Some(60),
            monitor_topic: None,
            leds_topic: None,
            scenario_topic: None,
            target_topics: Some(Vec::new()),
        }
    }
}

impl PresenceConfig {
    pub fn field_value(&self, field: ConfigField) -> Option<Value> {
        match field {
            ConfigField::BrokerAddress => self.broker_address.as_ref().map(|v| json!(v)),
            ConfigField::BrokerPort => self.broker_port.map(|v| json!(v)),
            ConfigField::PingTarget => self.ping_target.as_ref().map(|v| json!(v)),
            ConfigField::WaitTime => self.wait_time.map(|v| json!(v)),
            ConfigField::MonitorTopic => self.monitor_topic.as_ref().map(|v| json!(v)),
            ConfigField::LedsTopic => self.leds_topic.as_ref().map(|v| json!(v)),
            ConfigField::ScenarioTopic => self.scenario_topic.as_ref().map(|v| json!(v)),
            ConfigField::TargetTopics => self.target_topics.as_ref().map(|v| json!(v)),
        }
    }

    /// Coerces `value` into `field` and stores it when it differs from the
    /// current value. Returns whether anything changed; a value that cannot
    /// be coerced leaves the field untouched.
    ///
    /// Target topics compare as sets, so reordering is not a change.
    pub fn assign(&mut self, field: ConfigField, value: &Value) -> bool {
        match field {
            ConfigField::BrokerPort => assign_integer(&mut self.broker_port, value),
            ConfigField::WaitTime => assign_integer(&mut self.wait_time, value),
            ConfigField::BrokerAddress => assign_text(&mut self.broker_address, value),
            ConfigField::PingTarget => assign_text(&mut self.ping_target, value),
            ConfigField::MonitorTopic => assign_text(&mut self.monitor_topic, value),
            ConfigField::LedsTopic => assign_text(&mut self.leds_topic, value),
            ConfigField::ScenarioTopic => assign_text(&mut self.scenario_topic, value),
            ConfigField::TargetTopics => {
                let Some(items) = value.as_array() else {
                    return false;
                };
                let next: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect();
                let unchanged = self
                    .target_topics
                    .as_ref()
                    .map(|current| same_topic_set(current, &next))
                    .unwrap_or(false);
                if unchanged {
                    return false;
                }
                self.target_topics = Some(next);
                true
            }
        }
    }

    /// Overlays every recognised, non-null key of `overrides` without
    /// validating the result. Used to seed the store at startup.
    pub fn overlay(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            if value.is_null() {
                continue;
            }
            match ConfigField::from_key(key) {
                Some(field) => {
                    self.assign(field, value);
                }
                None => debug!(key = %key, "ignoring unknown config key"),
            }
        }
    }

    pub fn wait_secs(&self) -> i64 {
        self.wait_time.unwrap_or(60)
    }

    /// Every distinct, non-blank topic that takes part in presence fan-out,
    /// in configuration order.
    pub fn fanout_topics(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.leds_topic
            .iter()
            .chain(self.scenario_topic.iter())
            .chain(self.target_topics.iter().flatten())
            .map(String::as_str)
            .filter(|topic| !topic.trim().is_empty())
            .filter(|topic| seen.insert(*topic))
            .collect()
    }
}

fn assign_integer(slot: &mut Option<i64>, value: &Value) -> bool {
    match validate::parse_integer(value) {
        Some(parsed) if *slot != Some(parsed) => {
            *slot = Some(parsed);
            true
        }
        _ => false,
    }
}

fn assign_text(slot: &mut Option<String>, value: &Value) -> bool {
    match value.as_str() {
        Some(text) if slot.as_deref() != Some(text) => {
            *slot = Some(text.to_string());
            true
        }
        _ => false,
    }
}

fn same_topic_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a.symmetric_difference(&b).next().is_none()
}

/// Floor for every engine period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Engine timing and identity knobs. These never change at runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tick_interval: Duration,
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub ready_interval: Duration,
    pub keep_alive: Duration,
    pub instance: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
            ready_interval: Duration::from_secs(1),
            keep_alive: Duration::from_secs(60),
            instance: "presenced".to_string(),
        }
    }
}

#[cfg(test)]
impl PresenceConfig {
    pub(crate) fn complete_for_tests() -> Self {
        Self {
            broker_address: Some("broker.local".to_string()),
            broker_port: Some(1883),
            ping_target: Some("192.168.1.20".to_string()),
            wait_time: Some(60),
            monitor_topic: Some("presence/monitor".to_string()),
            leds_topic: Some("presence/leds".to_string()),
            scenario_topic: Some("presence/scenario".to_string()),
            target_topics: Some(vec!["presence/screen".to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_port_wait_time_and_empty_targets() {
        let config = PresenceConfig::default();
        assert_eq!(config.broker_port, Some(1883));
        assert_eq!(config.wait_time, Some(60));
        assert_eq!(config.target_topics, Some(Vec::new()));
        assert!(config.broker_address.is_none());
    }

    #[test]
    fn short_key_spellings_resolve() {
        assert_eq!(ConfigField::from_key("broker"), Some(ConfigField::BrokerAddress));
        assert_eq!(ConfigField::from_key("port"), Some(ConfigField::BrokerPort));
        assert_eq!(ConfigField::from_key("colour"), None);
    }

    #[test]
    fn integer_assignment_coerces_strings() {
        let mut config = PresenceConfig::default();
        assert!(!config.assign(ConfigField::WaitTime, &json!("60")));
        assert!(config.assign(ConfigField::WaitTime, &json!("90")));
        assert_eq!(config.wait_time, Some(90));
    }

    #[test]
    fn reordered_targets_are_not_a_change() {
        let mut config = PresenceConfig::default();
        assert!(config.assign(ConfigField::TargetTopics, &json!(["a", "b"])));
        assert!(!config.assign(ConfigField::TargetTopics, &json!(["b", "a"])));
        assert!(config.assign(ConfigField::TargetTopics, &json!(["a", "c"])));
    }

    #[test]
    fn overlay_skips_nulls_and_unknown_keys() {
        let mut config = PresenceConfig::default();
        let overrides = json!({"broker": "mqtt.lan", "waitTime": null, "unknown": 1});
        config.overlay(overrides.as_object().expect("object"));

        assert_eq!(config.broker_address.as_deref(), Some("mqtt.lan"));
        assert_eq!(config.wait_time, Some(60));
    }

    #[test]
    fn fanout_topics_are_distinct_and_skip_blanks() {
        let mut config = PresenceConfig::complete_for_tests();
        config.target_topics = Some(vec![
            "presence/scenario".to_string(),
            " ".to_string(),
            "presence/screen".to_string(),
        ]);

        assert_eq!(
            config.fanout_topics(),
            vec!["presence/leds", "presence/scenario", "presence/screen"]
        );
    }
}
