use super::mqtt_handler::SessionError;
use chrono::NaiveDateTime;
use std::fmt;

/// Payload that starts a fetch-and-publish cycle
pub const TRIGGER_PAYLOAD: &str = "1";

/// Payload published on a command topic once a cycle has finished
pub const COMPLETION_PAYLOAD: &str = "0";

/// Inbound payload on a command topic, decoded once at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Trigger,
    Other,
}

impl Command {
    /// Only the exact payload `"1"` triggers; no trimming, no case folding
    pub fn decode(payload: &[u8]) -> Self {
        if payload == TRIGGER_PAYLOAD.as_bytes() {
            Command::Trigger
        } else {
            Command::Other
        }
    }
}

/// A message delivered by the broker on one of our subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn command(&self) -> Command {
        Command::decode(&self.payload)
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.topic,
            String::from_utf8_lossy(&self.payload)
        )
    }
}

/// One value handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFact {
    pub topic: String,
    pub value: String,
    pub retained: bool,
}

impl PublishedFact {
    pub fn new(topic: impl Into<String>, value: impl Into<String>, retained: bool) -> Self {
        PublishedFact {
            topic: topic.into(),
            value: value.into(),
            retained,
        }
    }

    /// Completion signal for a command topic
    pub fn completion(command_topic: impl Into<String>) -> Self {
        PublishedFact::new(command_topic, COMPLETION_PAYLOAD, false)
    }
}

/// Topic prefix every bridge topic is rooted under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    prefix: String,
}

impl TopicNamespace {
    pub fn new(prefix: &str) -> Result<Self, SessionError> {
        let prefix = prefix.trim().trim_matches('/');
        if prefix.is_empty() {
            return Err(SessionError::InvalidTopic(
                "topic prefix must not be empty".to_string(),
            ));
        }
        if prefix.contains(['+', '#']) {
            return Err(SessionError::InvalidTopic(format!(
                "topic prefix must not contain wildcards: {}",
                prefix
            )));
        }
        Ok(Self {
            prefix: prefix.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn topic(&self, category: &str, field: &str) -> String {
        format!("{}/{}/{}", self.prefix, category, field)
    }

    pub fn battery_command(&self) -> String {
        format!("{}/battery/update", self.prefix)
    }

    pub fn daily_command(&self) -> String {
        format!("{}/daily", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_trigger_is_a_trigger() {
        assert_eq!(Command::decode(b"1"), Command::Trigger);

        let payloads: [&[u8]; 9] = [
            b"0",
            b"",
            b"2",
            b"11",
            b"true",
            b" 1\n",
            b"1\n",
            b"\t1 ",
            &[0xff, 0xfe],
        ];
        for payload in payloads {
            assert_eq!(Command::decode(payload), Command::Other);
        }
    }

    #[test]
    fn completion_is_not_retained() {
        let fact = PublishedFact::completion("car/daily");
        assert_eq!(fact, PublishedFact::new("car/daily", "0", false));
        assert_eq!(Command::decode(fact.value.as_bytes()), Command::Other);
    }

    #[test]
    fn namespace_builds_rooted_topics() {
        let ns = TopicNamespace::new("/home/leaf/").expect("namespace");
        assert_eq!(ns.prefix(), "home/leaf");
        assert_eq!(ns.battery_command(), "home/leaf/battery/update");
        assert_eq!(ns.daily_command(), "home/leaf/daily");
        assert_eq!(
            ns.topic("battery", "timetofull/level1"),
            "home/leaf/battery/timetofull/level1"
        );
    }

    #[test]
    fn namespace_rejects_empty_and_wildcards() {
        assert!(TopicNamespace::new("").is_err());
        assert!(TopicNamespace::new(" / ").is_err());
        assert!(TopicNamespace::new("car/#").is_err());
        assert!(TopicNamespace::new("car/+/x").is_err());
    }

    #[test]
    fn message_display_shows_topic_and_payload() {
        let message = BusMessage::new("car/daily", "1");
        assert_eq!(message.to_string(), "[car/daily] 1");
        assert_eq!(message.command(), Command::Trigger);
    }
}
