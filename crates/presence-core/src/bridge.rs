use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::monitor::PresenceState;
use crate::store::ConfigError;

/// Messages towards the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notification", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    State(PresenceState),
    Ready(bool),
    ConfigApplied { changed: bool },
    ConfigRejected { error: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "notification", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
enum Request {
    SetConfig(Map<String, Value>),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request must be a JSON object")]
    NotAnObject,
}

/// Parses one inbound line: either a bare config patch or a
/// `{"notification":"SET_CONFIG","payload":{...}}` envelope.
pub fn parse_request(line: &str) -> Result<Map<String, Value>, BridgeError> {
    let value: Value = serde_json::from_str(line)?;
    match value {
        Value::Object(map) if map.contains_key("notification") => {
            let Request::SetConfig(patch) = serde_json::from_value(Value::Object(map))?;
            Ok(patch)
        }
        Value::Object(map) => Ok(map),
        _ => Err(BridgeError::NotAnObject),
    }
}

/// Outbound half of the bridge. Status is only relayed when it changes.
pub struct NotificationBridge {
    tx: mpsc::UnboundedSender<Notification>,
    last_status: Option<PresenceState>,
}

impl NotificationBridge {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                last_status: None,
            },
            rx,
        )
    }

    pub fn status(&mut self, state: PresenceState) {
        if self.last_status == Some(state) {
            return;
        }
        self.last_status = Some(state);
        self.send(Notification::State(state));
    }

    pub fn ready(&self, ready: bool) {
        self.send(Notification::Ready(ready));
    }

    pub fn config_result(&self, result: &Result<bool, ConfigError>) {
        let notification = match result {
            Ok(changed) => Notification::ConfigApplied { changed: *changed },
            Err(err) => Notification::ConfigRejected {
                error: err.to_string(),
            },
        };
        self.send(notification);
    }

    fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigField;
    use serde_json::json;

    #[test]
    fn notifications_serialize_as_tagged_envelopes() {
        let state = serde_json::to_value(Notification::State(PresenceState::Uncertain)).expect("json");
        let ready = serde_json::to_value(Notification::Ready(true)).expect("json");
        let applied =
            serde_json::to_value(Notification::ConfigApplied { changed: false }).expect("json");

        assert_eq!(state, json!({"notification": "STATE", "payload": "IDLE"}));
        assert_eq!(ready, json!({"notification": "READY", "payload": true}));
        assert_eq!(
            applied,
            json!({"notification": "CONFIG_APPLIED", "payload": {"changed": false}})
        );
    }

    #[test]
    fn bare_objects_and_envelopes_both_parse() {
        let bare = parse_request(r#"{"broker":"b","port":1883}"#).expect("bare");
        let wrapped =
            parse_request(r#"{"notification":"SET_CONFIG","payload":{"broker":"b"}}"#).expect("envelope");

        assert_eq!(bare.get("port"), Some(&json!(1883)));
        assert_eq!(wrapped.get("broker"), Some(&json!("b")));
    }

    #[test]
    fn malformed_requests_are_errors() {
        assert!(matches!(parse_request("not json"), Err(BridgeError::Json(_))));
        assert!(matches!(parse_request("[1,2]"), Err(BridgeError::NotAnObject)));
        assert!(matches!(
            parse_request(r#"{"notification":"REBOOT","payload":{}}"#),
            Err(BridgeError::Json(_))
        ));
    }

    #[test]
    fn status_is_relayed_only_on_change() {
        let (mut bridge, mut rx) = NotificationBridge::channel();

        bridge.status(PresenceState::Uncertain);
        bridge.status(PresenceState::Uncertain);
        bridge.status(PresenceState::Absent);

        assert_eq!(rx.try_recv().ok(), Some(Notification::State(PresenceState::Uncertain)));
        assert_eq!(rx.try_recv().ok(), Some(Notification::State(PresenceState::Absent)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn config_results_map_to_applied_or_rejected() {
        let (bridge, mut rx) = NotificationBridge::channel();

        bridge.config_result(&Ok(true));
        bridge.config_result(&Err(ConfigError::InvalidConfig {
            fields: vec![ConfigField::PingTarget],
        }));

        assert_eq!(rx.try_recv().ok(), Some(Notification::ConfigApplied { changed: true }));
        assert_eq!(
            rx.try_recv().ok(),
            Some(Notification::ConfigRejected {
                error: "invalid config: pingTarget".to_string()
            })
        );
    }
}
