//! Domain model: channels, messages, wire records, per-message metadata and
//! health entries.
//!
//! Nothing here knows about streams or the broker; these are the values the
//! other layers pass around.

pub mod channel;
pub mod errors;
pub mod health;
pub mod message;
pub mod metadata;
pub mod record;

pub use self::channel::{ChannelName, Direction, MergePolicy, Shape};
pub use self::errors::{AckError, BoxError, FailureCause};
pub use self::health::{ChannelInfo, HealthReport, HealthReportBuilder};
pub use self::message::{AckFuture, Message, Metadata, Payload};
pub use self::metadata::{
    OutgoingCloudEventMetadata, OutgoingCloudEventMetadataBuilder, OutgoingRecordMetadata,
    OutgoingRecordMetadataBuilder,
};
pub use self::record::{Header, Headers, ProducerRecord, RecordMetadata};
