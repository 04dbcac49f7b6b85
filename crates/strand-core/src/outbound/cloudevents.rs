//! Cloud event encoding of outbound records.
//!
//! Binary mode writes the attributes as `ce_*` headers and keeps the payload
//! as the record value. Structured mode serializes the whole event, payload
//! included, as a JSON string value. In both modes an attribute set on the
//! message wins over the channel default.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

use crate::domain::message::Message;
use crate::domain::metadata::OutgoingCloudEventMetadata;
use crate::domain::record::ProducerRecord;

use super::config::OutgoingChannelConfig;
use super::record::RecordFields;

pub const SPEC_VERSION: &str = "1.0";
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json; charset=UTF-8";

const HEADER_PREFIX: &str = "ce_";
const CONTENT_TYPE_HEADER: &str = "content-type";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudEventError {
    #[error("cannot write a cloud event without the `{0}` attribute")]
    MissingAttribute(&'static str),

    #[error("cannot serialize the cloud event: {0}")]
    Serialize(String),
}

/// Attributes of one event after merging message metadata with channel defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Attributes {
    specversion: &'static str,
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(rename = "datacontenttype", skip_serializing_if = "Option::is_none")]
    data_content_type: Option<String>,
    #[serde(rename = "dataschema", skip_serializing_if = "Option::is_none")]
    data_schema: Option<String>,
    #[serde(flatten)]
    extensions: BTreeMap<String, String>,
}

impl Attributes {
    fn resolve(
        metadata: Option<&OutgoingCloudEventMetadata>,
        config: &OutgoingChannelConfig,
    ) -> Result<Self, CloudEventError> {
        let pick = |from_message: Option<&str>, default: &Option<String>| {
            from_message.map(str::to_string).or_else(|| default.clone())
        };

        let source = pick(metadata.and_then(|m| m.source()), &config.cloud_events_source)
            .ok_or(CloudEventError::MissingAttribute("source"))?;
        let event_type = pick(metadata.and_then(|m| m.event_type()), &config.cloud_events_type)
            .ok_or(CloudEventError::MissingAttribute("type"))?;
        let id = metadata
            .and_then(|m| m.id())
            .map(str::to_string)
            .unwrap_or_else(|| Ulid::new().to_string());
        let time = metadata
            .and_then(|m| m.time())
            .or_else(|| config.cloud_events_insert_timestamp.then(Utc::now))
            .map(format_time);

        Ok(Self {
            specversion: SPEC_VERSION,
            id,
            source,
            event_type,
            subject: pick(metadata.and_then(|m| m.subject()), &config.cloud_events_subject),
            time,
            data_content_type: pick(
                metadata.and_then(|m| m.data_content_type()),
                &config.cloud_events_data_content_type,
            ),
            data_schema: pick(metadata.and_then(|m| m.data_schema()), &config.cloud_events_data_schema),
            extensions: metadata.map(|m| m.extensions().clone()).unwrap_or_default(),
        })
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Binary mode: attributes as headers, payload value untouched.
pub fn binary_record(
    message: &Message,
    fields: RecordFields,
    config: &OutgoingChannelConfig,
) -> Result<ProducerRecord, CloudEventError> {
    let metadata = message.get_metadata::<OutgoingCloudEventMetadata>();
    let attributes = Attributes::resolve(metadata, config)?;
    let mut fields = fields;

    let headers = &mut fields.headers;
    headers.add(format!("{HEADER_PREFIX}specversion"), attributes.specversion);
    headers.add(format!("{HEADER_PREFIX}id"), attributes.id);
    headers.add(format!("{HEADER_PREFIX}source"), attributes.source);
    headers.add(format!("{HEADER_PREFIX}type"), attributes.event_type);
    if let Some(subject) = attributes.subject {
        headers.add(format!("{HEADER_PREFIX}subject"), subject);
    }
    if let Some(time) = attributes.time {
        headers.add(format!("{HEADER_PREFIX}time"), time);
    }
    if let Some(schema) = attributes.data_schema {
        headers.add(format!("{HEADER_PREFIX}dataschema"), schema);
    }
    if let Some(content_type) = attributes.data_content_type {
        headers.add(CONTENT_TYPE_HEADER, content_type);
    }
    for (name, value) in attributes.extensions {
        headers.add(format!("{HEADER_PREFIX}{name}"), value);
    }

    Ok(fields.into_record(message.payload().value().clone()))
}

/// Structured mode: the whole event as a JSON string value.
pub fn structured_record(
    message: &Message,
    fields: RecordFields,
    config: &OutgoingChannelConfig,
) -> Result<ProducerRecord, CloudEventError> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        #[serde(flatten)]
        attributes: Attributes,
        data: &'a Value,
    }

    let metadata = message.get_metadata::<OutgoingCloudEventMetadata>();
    let envelope = Envelope {
        attributes: Attributes::resolve(metadata, config)?,
        data: message.payload().value(),
    };
    let encoded = serde_json::to_string(&envelope).map_err(|e| CloudEventError::Serialize(e.to_string()))?;

    let mut fields = fields;
    fields.headers.add(CONTENT_TYPE_HEADER, STRUCTURED_CONTENT_TYPE);
    Ok(fields.into_record(Value::String(encoded)))
}
