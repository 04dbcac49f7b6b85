//! Outbound channel configuration.
//!
//! Keys are kebab-case and every field has a default, so a channel can be
//! configured with as little as `{}`. Broker-level keys that have no field
//! (`max.block.ms`, `linger.ms`, ...) go in `properties` and are handed to the
//! broker client untouched.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::channel::ChannelName;
use crate::ports::broker::ProducerProperties;

/// Class name of the broker's plain string serializer.
pub const STRING_SERIALIZER: &str = "org.apache.kafka.common.serialization.StringSerializer";

/// Broker client default for in-flight requests. When configured to this
/// value the in-flight bound comes from `max.block.ms` instead.
pub const DEFAULT_MAX_INFLIGHT: usize = 5;

const MAX_BLOCK_MS: &str = "max.block.ms";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "invalid value serializer to write a structured cloud event on channel {channel}: {} must be used, found: {found}",
        STRING_SERIALIZER
    )]
    InvalidStructuredSerializer { channel: ChannelName, found: String },

    #[error("invalid cloud-events mode `{0}`, expected `binary` or `structured`")]
    InvalidMode(String),

    #[error("configuration file {path} not found")]
    Missing { path: String },

    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How cloud events are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CloudEventsMode {
    /// Attributes as `ce_*` headers, payload as the record value.
    #[default]
    Binary,
    /// Whole event serialized as JSON into the record value.
    Structured,
}

impl TryFrom<String> for CloudEventsMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("binary") {
            Ok(CloudEventsMode::Binary)
        } else if value.eq_ignore_ascii_case("structured") {
            Ok(CloudEventsMode::Structured)
        } else {
            Err(ConfigError::InvalidMode(value))
        }
    }
}

impl From<CloudEventsMode> for String {
    fn from(mode: CloudEventsMode) -> Self {
        match mode {
            CloudEventsMode::Binary => "binary".to_string(),
            CloudEventsMode::Structured => "structured".to_string(),
        }
    }
}

/// Configuration of one outbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutgoingChannelConfig {
    /// Filled from the key of the `outgoing` map when absent.
    pub channel: ChannelName,
    /// Destination topic; the channel name when absent.
    pub topic: Option<String>,
    /// Fixed partition, `-1` for none.
    pub partition: i32,
    /// Static record key.
    pub key: Option<String>,
    pub acks: String,
    pub bootstrap_servers: String,
    pub key_serializer: String,
    pub value_serializer: String,
    /// Extra attempts after the first failed send.
    pub retries: u64,
    pub max_inflight_messages: usize,

    pub cloud_events: bool,
    pub cloud_events_mode: CloudEventsMode,
    pub cloud_events_type: Option<String>,
    pub cloud_events_source: Option<String>,
    pub cloud_events_subject: Option<String>,
    pub cloud_events_data_content_type: Option<String>,
    pub cloud_events_data_schema: Option<String>,
    pub cloud_events_insert_timestamp: bool,

    pub health_enabled: bool,
    pub health_readiness_enabled: bool,
    #[serde(rename = "health-readiness-timeout")]
    pub health_readiness_timeout_ms: u64,

    pub tracing_enabled: bool,

    /// Broker client properties passed through as-is.
    pub properties: BTreeMap<String, String>,
}

impl Default for OutgoingChannelConfig {
    fn default() -> Self {
        Self {
            channel: ChannelName::default(),
            topic: None,
            partition: -1,
            key: None,
            acks: "1".to_string(),
            bootstrap_servers: "localhost:9092".to_string(),
            key_serializer: STRING_SERIALIZER.to_string(),
            value_serializer: STRING_SERIALIZER.to_string(),
            retries: 2_147_483_647,
            max_inflight_messages: DEFAULT_MAX_INFLIGHT,
            cloud_events: true,
            cloud_events_mode: CloudEventsMode::Binary,
            cloud_events_type: None,
            cloud_events_source: None,
            cloud_events_subject: None,
            cloud_events_data_content_type: None,
            cloud_events_data_schema: None,
            cloud_events_insert_timestamp: true,
            health_enabled: true,
            health_readiness_enabled: true,
            health_readiness_timeout_ms: 2000,
            tracing_enabled: true,
            properties: BTreeMap::new(),
        }
    }
}

impl OutgoingChannelConfig {
    pub fn new(channel: impl Into<ChannelName>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Topic records go to unless a message overrides it.
    pub fn topic_or_channel(&self) -> &str {
        self.topic.as_deref().unwrap_or(self.channel.as_str())
    }

    /// Checks that must pass before any message is sent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud_events
            && self.cloud_events_mode == CloudEventsMode::Structured
            && !self.value_serializer.eq_ignore_ascii_case(STRING_SERIALIZER)
        {
            return Err(ConfigError::InvalidStructuredSerializer {
                channel: self.channel.clone(),
                found: self.value_serializer.clone(),
            });
        }
        Ok(())
    }

    /// Both attributes a cloud event cannot do without are set on the channel.
    pub fn has_mandatory_cloud_event_attributes(&self) -> bool {
        self.cloud_events_type.is_some() && self.cloud_events_source.is_some()
    }

    /// Maximum number of concurrent sends, never below one.
    pub fn effective_max_inflight(&self) -> usize {
        let bound = if self.max_inflight_messages == DEFAULT_MAX_INFLIGHT {
            self.properties
                .get(MAX_BLOCK_MS)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_INFLIGHT)
        } else {
            self.max_inflight_messages
        };
        bound.max(1)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.health_readiness_timeout_ms)
    }

    pub fn readiness_checks_enabled(&self) -> bool {
        self.health_enabled && self.health_readiness_enabled
    }

    /// Properties for the broker client. Pass-through entries win, except
    /// `acks` which always comes from the channel setting.
    pub fn producer_properties(&self) -> ProducerProperties {
        let mut properties = self.properties.clone();
        properties.insert("acks".to_string(), self.acks.clone());
        let defaults = [
            ("bootstrap.servers", self.bootstrap_servers.clone()),
            ("key.serializer", self.key_serializer.clone()),
            ("value.serializer", self.value_serializer.clone()),
            (
                "max.in.flight.requests.per.connection",
                self.max_inflight_messages.to_string(),
            ),
        ];
        for (key, value) in defaults {
            properties.entry(key.to_string()).or_insert(value);
        }
        properties
    }
}
