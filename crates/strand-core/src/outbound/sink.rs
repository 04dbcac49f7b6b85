//! OutboundSink - one outbound channel's delivery pipeline.
//!
//! ```text
//! upstream ──take_until(shutdown)──► write ×max_inflight ──► BrokerClient::send
//!                                      │                        │ retry (backoff)
//!                                      │                        ▼
//!                                      └── ack / nack ◄── success / final failure
//! ```
//!
//! # Design
//! - `buffer_unordered(max_inflight)` is the in-flight window: upstream is not
//!   polled while it is full, so nothing is dropped.
//! - A per-message failure is absorbed here (nack + failure buffer). Only an
//!   ack callback failure surfaces as a stage error, and even that does not
//!   stop the drain.
//! - Readiness talks to the admin client under a timeout and is never called
//!   from the send path.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::domain::channel::ChannelName;
use crate::domain::errors::{AckError, FailureCause};
use crate::domain::health::HealthReportBuilder;
use crate::domain::message::Message;
use crate::domain::metadata::{OutgoingCloudEventMetadata, OutgoingRecordMetadata};
use crate::domain::record::{ProducerRecord, RecordMetadata};
use crate::ports::broker::{BrokerAdmin, BrokerClient, BrokerClientFactory, BrokerError};
use crate::ports::tracer::OutgoingTracer;
use crate::stream::{MessageStream, Subscriber};

use super::cloudevents::{self, CloudEventError};
use super::config::{CloudEventsMode, ConfigError, OutgoingChannelConfig};
use super::failures::FailureBuffer;
use super::record::RecordFields;
use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create broker client for channel {channel}: {source}")]
    Client {
        channel: ChannelName,
        #[source]
        source: BrokerError,
    },
}

/// Why a single message could not be delivered. Handed to its nack callback.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Encode(#[from] CloudEventError),

    #[error("{source} (after {attempts} attempt(s))")]
    Send {
        attempts: u64,
        #[source]
        source: BrokerError,
    },
}

/// Delivery pipeline of one outbound channel. Cheap to clone.
#[derive(Clone)]
pub struct OutboundSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    config: OutgoingChannelConfig,
    client: Arc<dyn BrokerClient>,
    admin: Option<Arc<dyn BrokerAdmin>>,
    tracer: Arc<dyn OutgoingTracer>,
    retry: RetryPolicy,
    max_inflight: usize,
    failures: FailureBuffer,
    stop: watch::Sender<bool>,
    closed: AtomicBool,
    active_drains: AtomicUsize,
    drained: Notify,
}

impl OutboundSink {
    /// Validates `config` and creates the broker clients.
    ///
    /// Fails before any message is sent when the configuration cannot work,
    /// e.g. structured cloud events with a non-string value serializer.
    pub fn new(
        config: OutgoingChannelConfig,
        factory: &dyn BrokerClientFactory,
        tracer: Arc<dyn OutgoingTracer>,
    ) -> Result<Self, SinkError> {
        config.validate()?;

        let properties = config.producer_properties();
        let client = factory.create_client(&properties).map_err(|source| SinkError::Client {
            channel: config.channel.clone(),
            source,
        })?;
        let admin = if config.readiness_checks_enabled() {
            match factory.create_admin(&properties) {
                Ok(admin) => Some(admin),
                Err(source) => {
                    release_detached(async move { client.close().await });
                    return Err(SinkError::Client {
                        channel: config.channel.clone(),
                        source,
                    });
                }
            }
        } else {
            None
        };

        let max_inflight = config.effective_max_inflight();
        let retry = RetryPolicy::for_retries(config.retries);
        debug!(
            channel = %config.channel,
            topic = config.topic_or_channel(),
            max_inflight,
            retries = config.retries,
            "outbound channel created"
        );

        let (stop, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(SinkInner {
                config,
                client,
                admin,
                tracer,
                retry,
                max_inflight,
                failures: FailureBuffer::new(),
                stop,
                closed: AtomicBool::new(false),
                active_drains: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        })
    }

    pub fn channel(&self) -> &ChannelName {
        &self.inner.config.channel
    }

    pub fn config(&self) -> &OutgoingChannelConfig {
        &self.inner.config
    }

    pub fn max_inflight(&self) -> usize {
        self.inner.max_inflight
    }

    /// Recent failures, oldest first.
    pub fn failures(&self) -> Vec<String> {
        self.inner.failures.snapshot()
    }

    /// Registry handle draining a message stream into this channel.
    pub fn subscriber(&self) -> Subscriber {
        let sink = self.clone();
        Subscriber::new(format!("outgoing:{}", self.channel()), move |stream| {
            let sink = sink.clone();
            async move { sink.drain(stream).await }
        })
    }

    async fn drain(&self, stream: MessageStream) {
        let _guard = DrainGuard::enter(&self.inner);
        let mut stop = self.inner.stop.subscribe();
        let stopped = async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };

        stream
            .take_until(stopped)
            .map(|message| self.write(message))
            .buffer_unordered(self.inner.max_inflight)
            .for_each(|outcome| async move {
                if let Err(e) = outcome {
                    error!(channel = %self.channel(), error = %e, "outbound stage failed");
                    self.inner.failures.record(e.to_string());
                }
            })
            .await;
        debug!(channel = %self.channel(), "outbound stream completed");
    }

    /// Delivers one message. `Err` only when the ack callback itself failed.
    async fn write(&self, message: Message) -> Result<(), AckError> {
        let record = match self.build_record(&message) {
            Ok(record) => record,
            Err(e) => {
                self.reject(&message, DeliveryError::from(e)).await;
                return Ok(());
            }
        };

        match self.send_with_retry(record).await {
            Ok(metadata) => {
                debug!(
                    channel = %self.channel(),
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "record acknowledged by broker"
                );
                message.ack().await
            }
            Err(e) => {
                self.reject(&message, e).await;
                Ok(())
            }
        }
    }

    fn build_record(&self, message: &Message) -> Result<ProducerRecord, CloudEventError> {
        let config = &self.inner.config;
        let overrides = message.get_metadata::<OutgoingRecordMetadata>();
        let mut fields = RecordFields::resolve(message, overrides, config);

        let as_event = config.cloud_events
            && (message.get_metadata::<OutgoingCloudEventMetadata>().is_some()
                || config.has_mandatory_cloud_event_attributes());
        if as_event {
            return match config.cloud_events_mode {
                CloudEventsMode::Binary => cloudevents::binary_record(message, fields, config),
                CloudEventsMode::Structured => cloudevents::structured_record(message, fields, config),
            };
        }

        if config.tracing_enabled {
            self.inner
                .tracer
                .inject(message, &fields.topic, fields.partition, &mut fields.headers);
        }
        Ok(fields.into_record(message.payload().value().clone()))
    }

    async fn send_with_retry(&self, record: ProducerRecord) -> Result<RecordMetadata, DeliveryError> {
        let retry = &self.inner.retry;
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.inner.client.send(record.clone()).await {
                Ok(metadata) => return Ok(metadata),
                Err(source) if source != BrokerError::Closed && retry.should_retry(attempts) => {
                    let delay = retry.jittered_delay(u32::try_from(attempts).unwrap_or(u32::MAX));
                    warn!(
                        channel = %self.channel(),
                        topic = %record.topic,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source,
                        "send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => return Err(DeliveryError::Send { attempts, source }),
            }
        }
    }

    async fn reject(&self, message: &Message, err: DeliveryError) {
        warn!(channel = %self.channel(), error = %err, "message not delivered, nacking");
        self.inner.failures.record(err.to_string());
        let cause: FailureCause = Arc::new(err);
        if let Err(e) = message.nack(cause).await {
            warn!(channel = %self.channel(), error = %e, "nack failed");
        }
    }

    /// Appends this channel's liveness: unhealthy while any failure is kept.
    pub fn is_alive(&self, builder: &mut HealthReportBuilder) {
        if !self.inner.config.health_enabled {
            return;
        }
        let failures = self.inner.failures.snapshot();
        if failures.is_empty() {
            builder.add(self.channel(), true);
        } else {
            builder.add_with_message(self.channel(), false, failures.join("; "));
        }
    }

    /// Appends this channel's readiness: the topic exists on the broker.
    ///
    /// Bounded by the readiness timeout. Broker errors end up in the entry's
    /// message, never in the caller.
    pub async fn is_ready(&self, builder: &mut HealthReportBuilder) {
        let Some(admin) = &self.inner.admin else {
            return;
        };
        let config = &self.inner.config;
        let topic = config.topic_or_channel();
        match tokio::time::timeout(config.readiness_timeout(), admin.list_topics()).await {
            Ok(Ok(topics)) if topics.contains(topic) => {
                builder.add(self.channel(), true);
            }
            Ok(Ok(_)) => {
                builder.add_with_message(self.channel(), false, format!("Unable to find topic {topic}"));
            }
            Ok(Err(e)) => {
                builder.add_with_message(
                    self.channel(),
                    false,
                    format!("No response from broker for topic {topic} : {e}"),
                );
            }
            Err(elapsed) => {
                builder.add_with_message(
                    self.channel(),
                    false,
                    format!("No response from broker for topic {topic} : {elapsed}"),
                );
            }
        }
    }

    /// Stops pulling new messages, lets in-flight sends finish, then closes
    /// the broker clients.
    ///
    /// Returns `false` when draining did not finish within `timeout`; the
    /// clients are closed anyway. Release runs on its own task, so dropping
    /// this future does not leak them.
    /// Closes the clients of a channel that was never started.
    ///
    /// Callable from synchronous code, see [`release_detached`].
    pub fn discard(self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.channel(), "discarding outbound channel");
        self.inner.stop.send_replace(true);
        let inner = self.inner;
        release_detached(async move { inner.release().await });
    }

    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return true;
        }
        info!(channel = %self.channel(), "shutting down outbound channel");
        self.inner.stop.send_replace(true);

        let inner = Arc::clone(&self.inner);
        let mut release = tokio::spawn(async move {
            inner.wait_drained().await;
            inner.release().await;
        });

        match tokio::time::timeout(timeout, &mut release).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(channel = %self.channel(), error = %e, "outbound release task failed");
                self.inner.release().await;
                false
            }
            Err(_) => {
                error!(
                    channel = %self.channel(),
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "in-flight sends did not drain in time, closing client"
                );
                release.abort();
                self.inner.release().await;
                false
            }
        }
    }
}

impl SinkInner {
    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.active_drains.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn release(&self) {
        self.client.close().await;
        if let Some(admin) = &self.admin {
            admin.close().await;
        }
    }
}

/// Runs a client release from synchronous code: spawned on the current tokio
/// runtime when there is one, inline otherwise.
fn release_detached<F>(release: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(release);
        }
        Err(_) => futures::executor::block_on(release),
    }
}

/// Counts running drains so shutdown can wait for them.
struct DrainGuard<'a> {
    inner: &'a SinkInner,
}

impl<'a> DrainGuard<'a> {
    fn enter(inner: &'a SinkInner) -> Self {
        inner.active_drains.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.inner.active_drains.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Headers;
    use crate::impls::InMemoryBroker;
    use crate::ports::tracer::NoopTracer;
    use crate::stream::{Publisher, connect};
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;

    fn sink(config: OutgoingChannelConfig, broker: &InMemoryBroker) -> OutboundSink {
        OutboundSink::new(config, broker, Arc::new(NoopTracer)).unwrap()
    }

    /// Message whose ack/nack outcome lands in `log`.
    fn tracked(value: i64, log: &Arc<Mutex<Vec<String>>>) -> Message {
        let acks = Arc::clone(log);
        let nacks = Arc::clone(log);
        Message::new(json!(value))
            .with_ack(move || {
                acks.lock().unwrap().push(format!("ack {value}"));
                async { Ok::<(), AckError>(()) }
            })
            .with_nack(move |cause| {
                nacks.lock().unwrap().push(format!("nack {value}: {cause}"));
                async { Ok::<(), AckError>(()) }
            })
    }

    async fn deliver(sink: &OutboundSink, messages: Vec<Message>) {
        sink.subscriber().consume(stream::iter(messages).boxed()).await;
    }

    #[tokio::test]
    async fn successful_send_acks_the_message() {
        let broker = InMemoryBroker::new();
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);
        let log = Arc::new(Mutex::new(Vec::new()));

        deliver(&sink, vec![tracked(1, &log)]).await;

        assert_eq!(*log.lock().unwrap(), vec!["ack 1".to_string()]);
        let records = broker.records("prices");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, json!(1));
        assert!(sink.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_nack_and_record_the_failure() {
        let broker = InMemoryBroker::new();
        broker.fail_all_sends(true);
        let mut config = OutgoingChannelConfig::new("prices");
        config.retries = 3;
        let sink = sink(config, &broker);
        let log = Arc::new(Mutex::new(Vec::new()));

        deliver(&sink, vec![tracked(7, &log)]).await;

        assert_eq!(broker.send_attempts(), 4);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("nack 7"), "{}", log[0]);
        assert!(log[0].contains("after 4 attempt(s)"), "{}", log[0]);
        assert_eq!(sink.failures().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_then_acked() {
        let broker = InMemoryBroker::new();
        broker.fail_next_sends(2);
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);
        let log = Arc::new(Mutex::new(Vec::new()));

        deliver(&sink, vec![tracked(3, &log)]).await;

        assert_eq!(broker.send_attempts(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["ack 3".to_string()]);
        assert!(sink.failures().is_empty());
    }

    #[tokio::test]
    async fn zero_retries_sends_once() {
        let broker = InMemoryBroker::new();
        broker.fail_all_sends(true);
        let mut config = OutgoingChannelConfig::new("prices");
        config.retries = 0;
        let sink = sink(config, &broker);

        deliver(&sink, vec![Message::new("x")]).await;

        assert_eq!(broker.send_attempts(), 1);
        assert_eq!(sink.failures().len(), 1);
    }

    #[tokio::test]
    async fn ack_failure_is_recorded_and_the_drain_continues() {
        let broker = InMemoryBroker::new();
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);
        let failing = Message::new("a").with_ack(|| async { Err::<(), AckError>(AckError::new("downstream gone")) });

        deliver(&sink, vec![failing, Message::new("b")]).await;

        assert_eq!(broker.records("prices").len(), 2);
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("downstream gone"));
    }

    #[tokio::test]
    async fn inflight_sends_never_exceed_the_bound() {
        let broker = InMemoryBroker::new();
        broker.set_send_delay(Duration::from_millis(20));
        let mut config = OutgoingChannelConfig::new("prices");
        config.max_inflight_messages = 2;
        let sink = sink(config, &broker);

        deliver(&sink, (0..8).map(|i| Message::new(json!(i))).collect()).await;

        assert_eq!(broker.records("prices").len(), 8);
        assert_eq!(broker.max_observed_inflight(), 2);
    }

    #[tokio::test]
    async fn cloud_event_metadata_selects_binary_encoding() {
        let broker = InMemoryBroker::new();
        let mut config = OutgoingChannelConfig::new("prices");
        config.cloud_events_source = Some("urn:test".to_string());
        let sink = sink(config, &broker);
        let message = Message::new("v").with_metadata(
            OutgoingCloudEventMetadata::builder().with_type("price.changed").build(),
        );

        deliver(&sink, vec![message, Message::new("plain")]).await;

        let records = broker.records("prices");
        assert_eq!(records.len(), 2);
        let event = records.iter().find(|r| r.value == json!("v")).unwrap();
        assert_eq!(event.headers.last_str("ce_type"), Some("price.changed"));
        let plain = records.iter().find(|r| r.value == json!("plain")).unwrap();
        assert!(plain.headers.is_empty());
    }

    #[tokio::test]
    async fn event_without_source_is_nacked() {
        let broker = InMemoryBroker::new();
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);
        let log = Arc::new(Mutex::new(Vec::new()));
        let message = tracked(5, &log)
            .with_metadata(OutgoingCloudEventMetadata::builder().with_type("t").build());

        deliver(&sink, vec![message]).await;

        assert_eq!(broker.send_attempts(), 0);
        assert!(log.lock().unwrap()[0].contains("`source`"));
    }

    #[tokio::test]
    async fn tracer_injects_into_plain_records() {
        struct Stamp;
        impl OutgoingTracer for Stamp {
            fn inject(&self, _: &Message, topic: &str, _: Option<i32>, headers: &mut Headers) {
                headers.add("traceparent", format!("trace-{topic}"));
            }
        }

        let broker = InMemoryBroker::new();
        let mut config = OutgoingChannelConfig::new("prices");
        let traced = OutboundSink::new(config.clone(), &broker, Arc::new(Stamp)).unwrap();
        deliver(&traced, vec![Message::new("a")]).await;

        config.channel = ChannelName::from("quiet");
        config.tracing_enabled = false;
        let untraced = OutboundSink::new(config, &broker, Arc::new(Stamp)).unwrap();
        deliver(&untraced, vec![Message::new("b")]).await;

        assert_eq!(broker.records("prices")[0].headers.last_str("traceparent"), Some("trace-prices"));
        assert!(broker.records("quiet")[0].headers.is_empty());
    }

    #[test]
    fn structured_mode_with_wrong_serializer_fails_construction() {
        let broker = InMemoryBroker::new();
        let mut config = OutgoingChannelConfig::new("prices");
        config.cloud_events_mode = CloudEventsMode::Structured;
        config.value_serializer = "io.example.AvroSerializer".to_string();

        let result = OutboundSink::new(config, &broker, Arc::new(NoopTracer));
        assert!(matches!(
            result,
            Err(SinkError::Config(ConfigError::InvalidStructuredSerializer { .. }))
        ));
        assert!(broker.last_properties().is_none());
    }

    #[test]
    fn producer_properties_reach_the_factory() {
        let broker = InMemoryBroker::new();
        let mut config = OutgoingChannelConfig::new("prices");
        config.acks = "all".to_string();
        sink(config, &broker);

        let properties = broker.last_properties().unwrap();
        assert_eq!(properties["acks"], "all");
        assert_eq!(properties["bootstrap.servers"], "localhost:9092");
    }

    #[tokio::test]
    async fn liveness_reflects_the_failure_buffer() {
        let broker = InMemoryBroker::new();
        broker.fail_all_sends(true);
        let mut config = OutgoingChannelConfig::new("prices");
        config.retries = 0;
        let sink = sink(config, &broker);

        let mut before = HealthReportBuilder::new();
        sink.is_alive(&mut before);
        assert!(before.build().is_ok());

        deliver(&sink, vec![Message::new("x")]).await;
        let mut after = HealthReportBuilder::new();
        sink.is_alive(&mut after);
        let report = after.build();
        let entry = report.channel("prices").unwrap();
        assert!(!entry.healthy);
        assert!(entry.message.as_deref().is_some_and(|m| m.contains("send failed")));
    }

    #[tokio::test]
    async fn disabled_health_adds_nothing() {
        let broker = InMemoryBroker::new();
        let mut config = OutgoingChannelConfig::new("prices");
        config.health_enabled = false;
        let sink = sink(config, &broker);

        let mut builder = HealthReportBuilder::new();
        sink.is_alive(&mut builder);
        sink.is_ready(&mut builder).await;
        assert!(builder.build().channels().is_empty());
    }

    #[tokio::test]
    async fn readiness_checks_the_topic() {
        let broker = InMemoryBroker::new().with_topics(["prices"]);
        let present = sink(OutgoingChannelConfig::new("prices"), &broker);
        let absent = sink(OutgoingChannelConfig::new("orders"), &broker);

        let mut builder = HealthReportBuilder::new();
        present.is_ready(&mut builder).await;
        absent.is_ready(&mut builder).await;
        let report = builder.build();

        assert!(report.channel("prices").unwrap().healthy);
        let orders = report.channel("orders").unwrap();
        assert!(!orders.healthy);
        assert_eq!(orders.message.as_deref(), Some("Unable to find topic orders"));
    }

    #[tokio::test]
    async fn unreachable_broker_is_reported_not_raised() {
        let broker = InMemoryBroker::new();
        broker.set_unavailable(true);
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);

        let mut builder = HealthReportBuilder::new();
        sink.is_ready(&mut builder).await;
        let report = builder.build();
        let entry = report.channel("prices").unwrap();
        assert!(!entry.healthy);
        assert!(
            entry
                .message
                .as_deref()
                .is_some_and(|m| m.starts_with("No response from broker for topic prices : "))
        );
    }

    #[tokio::test]
    async fn shutdown_drains_inflight_then_closes() {
        let broker = InMemoryBroker::new();
        broker.set_send_delay(Duration::from_millis(30));
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);

        let (tx, rx) = futures::channel::mpsc::unbounded::<Message>();
        let upstream = Arc::new(Mutex::new(Some(rx)));
        let publisher = Publisher::new("test", move || match upstream.lock().unwrap().take() {
            Some(rx) => rx.boxed(),
            None => stream::empty().boxed(),
        });
        let task = connect(&publisher, &sink.subscriber());

        tx.unbounded_send(Message::new("first")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(sink.shutdown(Duration::from_secs(1)).await);
        task.await.unwrap();

        assert_eq!(broker.records("prices").len(), 1);
        assert_eq!(broker.client_close_count(), 1);
        assert_eq!(broker.admin_close_count(), 1);
        // upstream is no longer polled
        assert!(tx.unbounded_send(Message::new("late")).is_err());
        assert!(sink.shutdown(Duration::from_secs(1)).await);
        assert_eq!(broker.client_close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_timeout_still_closes_the_client() {
        let broker = InMemoryBroker::new();
        broker.set_send_delay(Duration::from_secs(60));
        let mut config = OutgoingChannelConfig::new("prices");
        config.health_readiness_enabled = false;
        let sink = sink(config, &broker);
        let log = Arc::new(Mutex::new(Vec::new()));

        let drain = tokio::spawn({
            let sink = sink.clone();
            let message = tracked(1, &log);
            async move { deliver(&sink, vec![message]).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!sink.shutdown(Duration::from_millis(100)).await);
        assert_eq!(broker.client_close_count(), 1);
        assert_eq!(broker.admin_close_count(), 0);

        drain.await.unwrap();
        assert!(log.lock().unwrap()[0].starts_with("nack 1"));
    }

    #[test]
    fn admin_creation_failure_releases_the_client() {
        let broker = InMemoryBroker::new();
        broker.reject_admins(true);

        let result = OutboundSink::new(OutgoingChannelConfig::new("prices"), &broker, Arc::new(NoopTracer));

        assert!(matches!(result, Err(SinkError::Client { source: BrokerError::Unavailable(_), .. })));
        assert_eq!(broker.client_close_count(), 1);
    }

    #[test]
    fn discard_closes_both_clients_once() {
        let broker = InMemoryBroker::new();
        let sink = sink(OutgoingChannelConfig::new("prices"), &broker);

        sink.clone().discard();
        sink.discard();

        assert_eq!(broker.client_close_count(), 1);
        assert_eq!(broker.admin_close_count(), 1);
    }
}
