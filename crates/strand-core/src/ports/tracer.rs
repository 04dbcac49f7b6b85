//! OutgoingTracer port - propagation of tracing context into record headers.

use crate::domain::message::Message;
use crate::domain::record::Headers;

/// Injects tracing context for an outgoing record.
///
/// Span creation belongs to the implementation; the pipeline only hands over
/// the message, its destination and the headers it is about to send.
pub trait OutgoingTracer: Send + Sync {
    fn inject(&self, message: &Message, topic: &str, partition: Option<i32>, headers: &mut Headers);
}

/// Tracer that adds nothing. Used when no tracer is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl OutgoingTracer for NoopTracer {
    fn inject(&self, _message: &Message, _topic: &str, _partition: Option<i32>, _headers: &mut Headers) {}
}
