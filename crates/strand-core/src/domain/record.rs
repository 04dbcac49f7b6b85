//! Wire records handed to the broker client.

use chrono::{DateTime, Utc};

/// One record header. Values are raw bytes, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

/// Ordered list of record headers. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.0.push(Header {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Builder-style `add`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.add(key, value);
        self
    }

    /// Last value stored under `key`.
    pub fn last(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .rev()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Last value stored under `key`, decoded as UTF-8.
    pub fn last_str(&self, key: &str) -> Option<&str> {
        self.last(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A record ready to be submitted to the broker.
///
/// Key and value are still structured values: the broker client applies the
/// serializers named in the channel configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord {
    pub topic: String,
    /// `None` lets the broker client pick the partition.
    pub partition: Option<i32>,
    /// `None` lets the broker stamp the record.
    pub timestamp: Option<DateTime<Utc>>,
    pub key: Option<serde_json::Value>,
    pub value: serde_json::Value,
    pub headers: Headers,
}

/// Broker acknowledgement of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}
