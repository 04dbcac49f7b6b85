//! Stream handles stored in the registry.
//!
//! A [`Publisher`] is cold: every [`Publisher::subscribe`] materializes a fresh
//! message stream, so two consumers of the same handle each get their own run.
//! A [`Subscriber`] is a sink that drains one stream to completion.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;

use crate::domain::message::Message;

pub type MessageStream = BoxStream<'static, Message>;

type StreamFactory = dyn Fn() -> MessageStream + Send + Sync;
type SinkFn = dyn Fn(MessageStream) -> BoxFuture<'static, ()> + Send + Sync;

/// Producer handle: a factory of message streams.
#[derive(Clone)]
pub struct Publisher {
    label: Arc<str>,
    factory: Arc<StreamFactory>,
}

impl Publisher {
    pub fn new<F>(label: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn() -> MessageStream + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            factory: Arc::new(factory),
        }
    }

    /// Publisher replaying `messages` to every subscriber.
    pub fn from_messages(label: impl Into<Arc<str>>, messages: Vec<Message>) -> Self {
        let messages: Arc<[Message]> = messages.into();
        Self::new(label, move || stream::iter(messages.to_vec()).boxed())
    }

    /// Publisher that completes immediately.
    pub fn empty(label: impl Into<Arc<str>>) -> Self {
        Self::new(label, || stream::empty().boxed())
    }

    pub fn subscribe(&self) -> MessageStream {
        (self.factory)()
    }

    /// Human-readable origin, used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Publisher").field(&self.label).finish()
    }
}

/// Consumer handle: drains a message stream.
#[derive(Clone)]
pub struct Subscriber {
    label: Arc<str>,
    sink: Arc<SinkFn>,
}

impl Subscriber {
    pub fn new<F, Fut>(label: impl Into<Arc<str>>, sink: F) -> Self
    where
        F: Fn(MessageStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            sink: Arc::new(move |stream| sink(stream).boxed()),
        }
    }

    /// Future draining `stream` into this sink.
    pub fn consume(&self, stream: MessageStream) -> BoxFuture<'static, ()> {
        (self.sink)(stream)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscriber").field(&self.label).finish()
    }
}

/// Subscribe `subscriber` to a fresh run of `publisher` on the tokio runtime.
pub fn connect(publisher: &Publisher, subscriber: &Subscriber) -> JoinHandle<()> {
    tokio::spawn(subscriber.consume(publisher.subscribe()))
}
