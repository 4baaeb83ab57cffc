//! Topic layout of the gateway
//!
//! The gateway's own topics hang off a configurable root (`demo/central` by
//! default). Sensor topics are fixed by the devices that publish them.

use thiserror::Error;

/// Illumination sensor topic, integer string payload
pub const ILLUMINATION_TOPIC: &str = "casa/externo/luminosidade";

/// Room temperature sensor topic, integer string payload
pub const TEMPERATURE_TOPIC: &str = "casa/sala/temperatura";

/// Status payload while the session is up
pub const STATUS_ONLINE: &str = "online";

/// Status payload on graceful shutdown and as last will
pub const STATUS_OFFLINE: &str = "offline";

/// Fully-resolved gateway topics for one topic root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub status: String,
    pub telemetry: String,
    pub health: String,
    pub commands: String,
    pub config_filter: String,
    pub boot: String,
    pub alerts: String,
    pub custom: String,
}

impl TopicSet {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            status: format!("{root}/status"),
            telemetry: format!("{root}/telemetria"),
            health: format!("{root}/health"),
            commands: format!("{root}/comandos"),
            config_filter: format!("{root}/config/#"),
            boot: format!("{root}/boot"),
            alerts: format!("{root}/alertas"),
            custom: format!("{root}/custom"),
        }
    }

    /// Subscriptions issued every time the session is established, in order
    pub fn domain_subscriptions(&self) -> Vec<(String, u8)> {
        vec![
            (ILLUMINATION_TOPIC.to_string(), 1),
            (TEMPERATURE_TOPIC.to_string(), 1),
            (self.commands.clone(), 1),
            (self.config_filter.clone(), 0),
        ]
    }
}

/// Match a concrete topic against an MQTT filter with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Reject topics the broker would refuse for a publish
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(TopicError::InvalidChar(ch));
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains invalid character for publish: '{0}'")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_topic_set() {
        let topics = TopicSet::new("demo/central");
        assert_eq!(topics.status, "demo/central/status");
        assert_eq!(topics.telemetry, "demo/central/telemetria");
        assert_eq!(topics.health, "demo/central/health");
        assert_eq!(topics.commands, "demo/central/comandos");
        assert_eq!(topics.config_filter, "demo/central/config/#");
        assert_eq!(topics.boot, "demo/central/boot");
        assert_eq!(topics.alerts, "demo/central/alertas");
        assert_eq!(topics.custom, "demo/central/custom");
    }

    #[test]
    fn test_domain_subscription_order() {
        let subs = TopicSet::new("demo/central").domain_subscriptions();
        assert_eq!(
            subs,
            vec![
                ("casa/externo/luminosidade".to_string(), 1),
                ("casa/sala/temperatura".to_string(), 1),
                ("demo/central/comandos".to_string(), 1),
                ("demo/central/config/#".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("demo/central/config/#", "demo/central/config/interval"));
        assert!(topic_matches("demo/central/config/#", "demo/central/config"));
        assert!(topic_matches("casa/+/temperatura", "casa/sala/temperatura"));
        assert!(topic_matches("casa/sala/temperatura", "casa/sala/temperatura"));
        assert!(!topic_matches("casa/+/temperatura", "casa/sala/umidade"));
        assert!(!topic_matches("casa/sala", "casa/sala/temperatura"));
        assert!(!topic_matches("demo/central/comandos", "demo/central"));
    }

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("demo/central/status").is_ok());
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
        assert_eq!(
            validate_publish_topic("demo/+/status"),
            Err(TopicError::InvalidChar('+'))
        );
        assert_eq!(
            validate_publish_topic("demo/#"),
            Err(TopicError::InvalidChar('#'))
        );
    }

    proptest! {
        #[test]
        fn exact_filter_matches_itself(topic in "[a-z]{1,8}(/[a-z]{1,8}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn hash_filter_matches_every_subtopic(root in "[a-z]{1,8}", rest in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
            let filter = format!("{root}/#");
            let topic = format!("{root}/{rest}");
            prop_assert!(topic_matches(&filter, &topic));
        }
    }
}
