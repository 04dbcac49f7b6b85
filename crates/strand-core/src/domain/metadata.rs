//! Per-message metadata understood by outbound delivery.
//!
//! Both types are attached with [`Message::with_metadata`] and are immutable
//! once built.
//!
//! [`Message::with_metadata`]: super::message::Message::with_metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::record::Headers;

/// Per-message override of the outgoing record fields.
///
/// Every field is optional; absent fields fall back to the channel
/// configuration. A negative partition counts as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingRecordMetadata {
    topic: Option<String>,
    key: Option<Value>,
    partition: Option<i32>,
    timestamp: Option<DateTime<Utc>>,
    headers: Option<Headers>,
}

impl OutgoingRecordMetadata {
    pub fn builder() -> OutgoingRecordMetadataBuilder {
        OutgoingRecordMetadataBuilder::default()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// The override partition, only when it is a real partition number (>= 0).
    pub fn partition(&self) -> Option<i32> {
        self.partition.filter(|p| *p >= 0)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }
}

/// Fluent builder for [`OutgoingRecordMetadata`].
///
/// # Example
/// ```ignore
/// let metadata = OutgoingRecordMetadata::builder()
///     .with_topic("prices-eu")
///     .with_key("sku-42")
///     .build();
/// let message = Message::new(payload).with_metadata(metadata);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OutgoingRecordMetadataBuilder {
    inner: OutgoingRecordMetadata,
}

impl OutgoingRecordMetadataBuilder {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.inner.topic = Some(topic.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.inner.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.inner.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.inner.timestamp = Some(timestamp);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.inner.headers = Some(headers);
        self
    }

    pub fn build(self) -> OutgoingRecordMetadata {
        self.inner
    }
}

/// Cloud-event attributes a message wants on its outgoing record.
///
/// Attributes left empty fall back to the channel's `cloud-events-*`
/// settings; `id` defaults to a fresh ULID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingCloudEventMetadata {
    id: Option<String>,
    source: Option<String>,
    event_type: Option<String>,
    subject: Option<String>,
    time: Option<DateTime<Utc>>,
    data_content_type: Option<String>,
    data_schema: Option<String>,
    extensions: BTreeMap<String, String>,
}

impl OutgoingCloudEventMetadata {
    pub fn builder() -> OutgoingCloudEventMetadataBuilder {
        OutgoingCloudEventMetadataBuilder::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    pub fn data_schema(&self) -> Option<&str> {
        self.data_schema.as_deref()
    }

    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingCloudEventMetadataBuilder {
    inner: OutgoingCloudEventMetadata,
}

impl OutgoingCloudEventMetadataBuilder {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.inner.id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.inner.source = Some(source.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.inner.event_type = Some(event_type.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.inner.subject = Some(subject.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.inner.time = Some(time);
        self
    }

    pub fn with_data_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.inner.data_content_type = Some(content_type.into());
        self
    }

    pub fn with_data_schema(mut self, schema: impl Into<String>) -> Self {
        self.inner.data_schema = Some(schema.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.extensions.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> OutgoingCloudEventMetadata {
        self.inner
    }
}
