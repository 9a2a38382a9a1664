use serde_json::Value;

use crate::config::{ConfigField, PresenceConfig};

pub fn is_text(value: &Value) -> bool {
    value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

pub fn is_integer(value: &Value) -> bool {
    parse_integer(value).is_some()
}

pub fn is_topic_list(value: &Value) -> bool {
    match value.as_array() {
        Some(items) => !items.is_empty() && items.iter().all(is_text),
        None => false,
    }
}

/// Accepts JSON integers and numeric strings such as `"1883"`.
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn validate(field: ConfigField, value: &Value) -> bool {
    match field {
        ConfigField::BrokerPort | ConfigField::WaitTime => is_integer(value),
        ConfigField::TargetTopics => is_topic_list(value),
        ConfigField::BrokerAddress
        | ConfigField::PingTarget
        | ConfigField::MonitorTopic
        | ConfigField::LedsTopic
        | ConfigField::ScenarioTopic => is_text(value),
    }
}

/// Checks the selected fields (all of them when `keys` is `None`).
///
/// A missing required field fails. The two optional topics pass when unset
/// and must be non-blank when set.
pub fn validate_all(config: &PresenceConfig, keys: Option<&[ConfigField]>) -> bool {
    let selected = keys.unwrap_or(ConfigField::ALL);
    selected.iter().all(|field| match config.field_value(*field) {
        Some(value) => validate(*field, &value),
        None => field.is_optional(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_must_be_non_blank_string() {
        assert!(is_text(&json!("broker.local")));
        assert!(!is_text(&json!("   ")));
        assert!(!is_text(&json!("")));
        assert!(!is_text(&json!(42)));
        assert!(!is_text(&Value::Null));
    }

    #[test]
    fn integers_parse_from_numbers_and_strings() {
        assert_eq!(parse_integer(&json!(1883)), Some(1883));
        assert_eq!(parse_integer(&json!(" 60 ")), Some(60));
        assert_eq!(parse_integer(&json!("-5")), Some(-5));
        assert_eq!(parse_integer(&json!("sixty")), None);
        assert_eq!(parse_integer(&json!(1.5)), None);
        assert_eq!(parse_integer(&json!(true)), None);
    }

    #[test]
    fn topic_list_requires_every_entry_to_be_text() {
        assert!(is_topic_list(&json!(["home/a", "home/b"])));
        assert!(!is_topic_list(&json!([])));
        assert!(!is_topic_list(&json!(["home/a", " "])));
        assert!(!is_topic_list(&json!(["home/a", 3])));
        assert!(!is_topic_list(&json!("home/a")));
    }

    #[test]
    fn validate_all_fails_on_missing_required_field() {
        let mut config = PresenceConfig::complete_for_tests();
        assert!(validate_all(&config, None));

        config.ping_target = None;
        assert!(!validate_all(&config, None));
        assert!(validate_all(
            &config,
            Some(&[ConfigField::BrokerAddress, ConfigField::BrokerPort])
        ));
    }

    #[test]
    fn optional_topics_pass_when_unset_but_not_when_blank() {
        let mut config = PresenceConfig::complete_for_tests();
        config.leds_topic = None;
        config.scenario_topic = None;
        assert!(validate_all(&config, None));

        config.leds_topic = Some("  ".to_string());
        assert!(!validate_all(&config, None));
    }

    #[test]
    fn empty_target_topics_are_invalid() {
        let mut config = PresenceConfig::complete_for_tests();
        config.target_topics = Some(Vec::new());
        assert!(!validate_all(&config, Some(&[ConfigField::TargetTopics])));
    }
}
