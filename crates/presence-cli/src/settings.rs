use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use presence_core::ConfigField;
use serde_json::{json, Map, Value};

/// Config keys given on the command line. Only flags that were passed end up
/// in the overlay.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub broker: Option<String>,
    pub port: Option<i64>,
    pub ping_target: Option<String>,
    pub wait_time: Option<i64>,
    pub monitor_topic: Option<String>,
    pub leds_topic: Option<String>,
    pub scenario_topic: Option<String>,
    pub target_topics: Vec<String>,
}

impl FlagOverrides {
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        put("brokerAddress", self.broker.as_ref().map(|v| json!(v)));
        put("brokerPort", self.port.map(|v| json!(v)));
        put("pingTarget", self.ping_target.as_ref().map(|v| json!(v)));
        put("waitTime", self.wait_time.map(|v| json!(v)));
        put("monitorTopic", self.monitor_topic.as_ref().map(|v| json!(v)));
        put("ledsTopic", self.leds_topic.as_ref().map(|v| json!(v)));
        put("scenarioTopic", self.scenario_topic.as_ref().map(|v| json!(v)));
        if !self.target_topics.is_empty() {
            put("targetTopics", Some(json!(self.target_topics)));
        }
        map
    }
}

pub fn parse_toml(text: &str) -> Result<Map<String, Value>> {
    let table: toml::Table = toml::from_str(text)?;
    match serde_json::to_value(table)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a table of config keys, got {other}"),
    }
}

pub fn load_file(path: &Path) -> Result<Map<String, Value>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
}

/// Rewrites short spellings (`broker`, `port`) to their canonical key so a
/// later source can replace them.
fn canonical(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| match ConfigField::from_key(&key) {
            Some(field) => (field.key().to_string(), value),
            None => (key, value),
        })
        .collect()
}

/// File keys first, then flags on top.
pub fn collect_overrides(path: Option<&Path>, flags: &FlagOverrides) -> Result<Map<String, Value>> {
    let mut overrides = match path {
        Some(path) => canonical(load_file(path)?),
        None => Map::new(),
    };
    overrides.extend(flags.to_map());
    Ok(overrides)
}
