//! Message → wire record field resolution.
//!
//! | field     | message override | payload     | channel config | otherwise     |
//! |-----------|------------------|-------------|----------------|---------------|
//! | topic     | `topic`          |             | `topic`        | channel name  |
//! | partition | `partition >= 0` |             | `partition >= 0` | unset       |
//! | timestamp | `timestamp`      |             |                | unset         |
//! | key       | `key`            | record key  | `key`          | unset         |
//! | headers   | `headers`        |             |                | empty         |

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::message::Message;
use crate::domain::metadata::OutgoingRecordMetadata;
use crate::domain::record::{Headers, ProducerRecord};

use super::config::OutgoingChannelConfig;

/// Record fields resolved for one message, before the value is encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
    pub topic: String,
    pub partition: Option<i32>,
    pub timestamp: Option<DateTime<Utc>>,
    pub key: Option<Value>,
    pub headers: Headers,
}

impl RecordFields {
    pub fn resolve(
        message: &Message,
        metadata: Option<&OutgoingRecordMetadata>,
        config: &OutgoingChannelConfig,
    ) -> Self {
        let topic = metadata
            .and_then(OutgoingRecordMetadata::topic)
            .unwrap_or(config.topic_or_channel())
            .to_string();
        let partition = metadata
            .and_then(OutgoingRecordMetadata::partition)
            .or(Some(config.partition).filter(|p| *p >= 0));
        let timestamp = metadata.and_then(OutgoingRecordMetadata::timestamp);
        let key = metadata
            .and_then(OutgoingRecordMetadata::key)
            .or_else(|| message.payload().key())
            .cloned()
            .or_else(|| config.key.clone().map(Value::String));
        let headers = metadata
            .and_then(OutgoingRecordMetadata::headers)
            .cloned()
            .unwrap_or_default();
        Self {
            topic,
            partition,
            timestamp,
            key,
            headers,
        }
    }

    pub fn into_record(self, value: Value) -> ProducerRecord {
        ProducerRecord {
            topic: self.topic,
            partition: self.partition,
            timestamp: self.timestamp,
            key: self.key,
            value,
            headers: self.headers,
        }
    }
}
