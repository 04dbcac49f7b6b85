//! Message envelope: payload + typed metadata + ack/nack callbacks.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::Value;

use super::errors::{AckError, FailureCause};

/// Payload carried by a message.
///
/// `Record` is the keyed wrapper: outbound delivery uses its key when the
/// message carries no explicit key override.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Value(Value),
    Record { key: Option<Value>, value: Value },
}

impl Payload {
    pub fn record(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Payload::Record {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    /// The value part, unwrapping a keyed record.
    pub fn value(&self) -> &Value {
        match self {
            Payload::Value(value) => value,
            Payload::Record { value, .. } => value,
        }
    }

    /// Key of a keyed record.
    pub fn key(&self) -> Option<&Value> {
        match self {
            Payload::Value(_) => None,
            Payload::Record { key, .. } => key.as_ref(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Value(Value::String(value))
    }
}

/// Typed metadata attached to a message, at most one instance per type.
#[derive(Clone, Default)]
pub struct Metadata {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value`, replacing any previous instance of the same type.
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Completion of an ack or nack callback.
pub type AckFuture = BoxFuture<'static, Result<(), AckError>>;

type AckFn = Arc<dyn Fn() -> AckFuture + Send + Sync>;
type NackFn = Arc<dyn Fn(FailureCause) -> AckFuture + Send + Sync>;

/// Immutable envelope flowing through channels.
///
/// Cloning is cheap: metadata and callbacks are shared. A message without
/// callbacks acks and nacks successfully.
#[derive(Clone)]
pub struct Message {
    payload: Payload,
    metadata: Metadata,
    ack: Option<AckFn>,
    nack: Option<NackFn>,
}

impl Message {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Metadata::new(),
            ack: None,
            nack: None,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Metadata of kind `T`, if attached.
    pub fn get_metadata<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.metadata.get::<T>()
    }

    pub fn with_metadata<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.metadata = self.metadata.with(value);
        self
    }

    pub fn with_ack<F, Fut>(mut self, ack: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AckError>> + Send + 'static,
    {
        self.ack = Some(Arc::new(move || ack().boxed()));
        self
    }

    pub fn with_nack<F, Fut>(mut self, nack: F) -> Self
    where
        F: Fn(FailureCause) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AckError>> + Send + 'static,
    {
        self.nack = Some(Arc::new(move |cause| nack(cause).boxed()));
        self
    }

    /// A new message with `payload`, keeping this message's metadata and callbacks.
    pub fn with_payload(&self, payload: impl Into<Payload>) -> Message {
        Message {
            payload: payload.into(),
            metadata: self.metadata.clone(),
            ack: self.ack.clone(),
            nack: self.nack.clone(),
        }
    }

    pub fn ack(&self) -> AckFuture {
        match &self.ack {
            Some(ack) => ack(),
            None => future::ready(Ok(())).boxed(),
        }
    }

    pub fn nack(&self, cause: FailureCause) -> AckFuture {
        match &self.nack {
            Some(nack) => nack(cause),
            None => future::ready(Ok(())).boxed(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload)
            .field("metadata", &self.metadata)
            .field("ack", &self.ack.is_some())
            .field("nack", &self.nack.is_some())
            .finish()
    }
}
