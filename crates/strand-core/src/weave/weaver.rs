//! Weaver - 宣言されたエンドポイントを接続済みのストリームグラフに編み上げる
//!
//! # 学習ポイント
//! - 不動点反復 (fixed-point iteration): 1 ラウンドで接続できた mediator が
//!   出力ストリームを登録し、それが次の mediator を解決可能にする
//! - 進捗が止まったら (stale) strict なら起動失敗、lenient なら警告して部分グラフで続行
//! - merge policy 付きのチャネルは `LazySource` 経由で、不動点到達後に producer を確定
//!
//! # Design
//! The registry is only mutated here, on one thread, while the graph is woven.
//! Subscriptions are spawned on the current tokio runtime.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::channel::{ChannelName, MergePolicy, Shape};
use crate::stream::lazy::LazySource;
use crate::stream::publisher::{Publisher, connect};

use super::binding::{BindingTable, MediatorId};
use super::mediator::Mediator;
use super::owner::OwnerRegistry;
use super::registry::StreamRegistry;

/// What to do when the fixed point leaves mediators unconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeavingMode {
    /// Abort startup.
    Strict,
    /// Warn and run the resolvable part of the graph.
    #[default]
    Lenient,
}

fn join<T: Display>(items: &[T]) -> String {
    let items: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeavingError {
    #[error(
        "ambiguous binding for {mediator}: {producers} producers registered for channel `{channel}` and no merge policy declared"
    )]
    AmbiguousBinding {
        channel: ChannelName,
        mediator: MediatorId,
        producers: usize,
    },

    #[error(
        "impossible to bind mediators, some mediators are not connected: {}, available publishers: {}",
        join(.mediators),
        join(.available)
    )]
    Unresolved {
        mediators: Vec<MediatorId>,
        available: Vec<ChannelName>,
    },

    #[error("the graph was already woven")]
    AlreadyWoven,
}

/// A mediator left unconnected by a lenient weaving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedBinding {
    pub mediator: MediatorId,
    pub channel: ChannelName,
}

/// How a merged channel was finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedChannel {
    pub channel: ChannelName,
    pub policy: MergePolicy,
    pub producers: usize,
}

/// Outcome of one weaving pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeavingReport {
    /// Rounds of the fixed-point loop, including a final stale round.
    pub rounds: usize,
    pub unresolved: Vec<UnresolvedBinding>,
    /// Mediators excluded because their owner or invoker failed.
    pub failed: Vec<MediatorId>,
    pub merged: Vec<MergedChannel>,
    /// Channels with at least one producer when weaving ended.
    pub available_publishers: Vec<ChannelName>,
}

impl WeavingReport {
    pub fn unresolved(&self) -> &[UnresolvedBinding] {
        &self.unresolved
    }

    /// Channel names nobody produced into, sorted and deduplicated.
    pub fn unresolved_channels(&self) -> Vec<ChannelName> {
        let mut channels: Vec<ChannelName> = self.unresolved.iter().map(|u| u.channel.clone()).collect();
        channels.sort();
        channels.dedup();
        channels
    }

    pub fn unresolved_mediators(&self) -> Vec<MediatorId> {
        self.unresolved.iter().map(|u| u.mediator.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && self.failed.is_empty()
    }
}

/// Owns every mediator and the subscriptions started while weaving.
#[derive(Debug, Default)]
pub struct Weaver {
    mode: WeavingMode,
    mediators: Vec<Mediator>,
    lazy: Vec<LazySource>,
    /// Channels that had consumers before any mediator registered, with how
    /// many. The registry is append-only, so they are the first entries.
    external_sinks: BTreeMap<ChannelName, usize>,
    tasks: Vec<JoinHandle<()>>,
    woven: bool,
}

impl Weaver {
    pub fn new(mode: WeavingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> WeavingMode {
        self.mode
    }

    pub fn mediators(&self) -> &[Mediator] {
        &self.mediators
    }

    pub fn lazy_sources(&self) -> &[LazySource] {
        &self.lazy
    }

    /// Create a mediator per declaration and bind it.
    ///
    /// Publishers register their stream and subscribers their sink right away.
    /// A mediator whose invoker or owner fails is kept, in `Failed` state, and
    /// ignored by [`Weaver::weave`].
    pub fn initialize(&mut self, table: &BindingTable, owners: &mut OwnerRegistry, registry: &mut StreamRegistry) {
        self.external_sinks = registry
            .subscriber_names()
            .into_iter()
            .map(|name| {
                let count = registry.subscribers(name.as_str()).len();
                (name, count)
            })
            .collect();

        info!(mediators = table.len(), "initializing mediators");
        for record in table.records() {
            let mut mediator = Mediator::new(record.clone());
            debug!(mediator = %mediator.id(), shape = %mediator.shape(), "initializing");

            if mediator.bind_invoker().and_then(|()| mediator.bind_owner(owners)).is_ok() {
                match mediator.shape() {
                    Shape::Publisher => {
                        if let (Some(channel), Ok(stream)) = (mediator.outgoing().cloned(), mediator.stream()) {
                            debug!(mediator = %mediator.id(), channel = %channel, "registering publisher");
                            registry.register_publisher(channel, stream);
                        }
                    }
                    Shape::Subscriber => {
                        if let (Some(channel), Ok(sink)) = (mediator.incoming().cloned(), mediator.subscriber()) {
                            debug!(mediator = %mediator.id(), channel = %channel, "registering subscriber");
                            registry.register_subscriber(channel, sink);
                        }
                    }
                    Shape::Processor => {}
                }
            }
            self.mediators.push(mediator);
        }
    }

    /// Connect every resolvable mediator, then start the graph.
    pub fn weave(&mut self, registry: &mut StreamRegistry) -> Result<WeavingReport, WeavingError> {
        if self.woven {
            return Err(WeavingError::AlreadyWoven);
        }
        self.woven = true;

        info!("connecting mediators");
        let mut rounds = 0;
        let mut unsatisfied = self.unsatisfied();
        while !unsatisfied.is_empty() {
            rounds += 1;
            let before = unsatisfied.len();

            for index in unsatisfied {
                let Some(source) = self.aggregated_source(index, registry)? else {
                    continue;
                };
                let mediator = &mut self.mediators[index];
                if let Err(e) = mediator.connect_to_upstream(source.clone()) {
                    warn!(mediator = %mediator.id(), error = %e, "cannot connect");
                    continue;
                }
                info!(mediator = %mediator.id(), upstream = source.label(), "connected");
                if let Some(channel) = mediator.outgoing().cloned() {
                    match mediator.stream() {
                        Ok(stream) => registry.register_publisher(channel, stream),
                        Err(e) => warn!(mediator = %mediator.id(), error = %e, "no stream to register"),
                    }
                }
            }

            unsatisfied = self.unsatisfied();
            if unsatisfied.len() == before {
                let mediators: Vec<MediatorId> =
                    unsatisfied.iter().map(|&i| self.mediators[i].id().clone()).collect();
                let available = registry.publisher_names();
                match self.mode {
                    WeavingMode::Strict => {
                        return Err(WeavingError::Unresolved { mediators, available });
                    }
                    WeavingMode::Lenient => {
                        warn!(
                            mediators = %join(&mediators),
                            available = %join(&available),
                            "impossible to bind mediators, some mediators are not connected"
                        );
                    }
                }
                break;
            }
        }

        let merged = self.configure_lazy_sources(registry);
        self.run_subscribers();
        self.connect_external_sinks(registry);

        let report = WeavingReport {
            rounds,
            unresolved: unsatisfied
                .iter()
                .filter_map(|&i| {
                    let mediator = &self.mediators[i];
                    mediator.incoming().map(|channel| UnresolvedBinding {
                        mediator: mediator.id().clone(),
                        channel: channel.clone(),
                    })
                })
                .collect(),
            failed: self
                .mediators
                .iter()
                .filter(|m| m.is_failed())
                .map(|m| m.id().clone())
                .collect(),
            merged,
            available_publishers: registry.publisher_names(),
        };
        info!(rounds = report.rounds, unresolved = report.unresolved.len(), failed = report.failed.len(), "weaving done");
        Ok(report)
    }

    /// Abort every subscription started by this weaver.
    pub fn shutdown(&mut self) {
        for mediator in &mut self.mediators {
            mediator.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Indices of live mediators with an incoming channel and no upstream yet.
    fn unsatisfied(&self) -> Vec<usize> {
        self.mediators
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_failed() && !m.is_connected())
            .map(|(i, _)| i)
            .collect()
    }

    fn aggregated_source(&mut self, index: usize, registry: &StreamRegistry) -> Result<Option<Publisher>, WeavingError> {
        let mediator = &self.mediators[index];
        let Some(channel) = mediator.incoming().cloned() else {
            return Ok(None);
        };
        let producers = registry.publishers(channel.as_str());
        if producers.is_empty() {
            return Ok(None);
        }

        let policy = mediator.merge();
        if policy.is_declared() {
            return Ok(Some(self.lazy_source(channel, policy).publisher()));
        }
        if producers.len() > 1 {
            return Err(WeavingError::AmbiguousBinding {
                channel,
                mediator: mediator.id().clone(),
                producers: producers.len(),
            });
        }
        Ok(producers.first().cloned())
    }

    /// The lazy source for `(channel, policy)`, created on first request.
    fn lazy_source(&mut self, channel: ChannelName, policy: MergePolicy) -> LazySource {
        if let Some(existing) = self
            .lazy
            .iter()
            .find(|l| *l.channel() == channel && l.policy() == policy)
        {
            return existing.clone();
        }
        let lazy = LazySource::new(channel, policy);
        self.lazy.push(lazy.clone());
        lazy
    }

    fn configure_lazy_sources(&self, registry: &StreamRegistry) -> Vec<MergedChannel> {
        self.lazy
            .iter()
            .map(|lazy| {
                let producers = registry.publishers(lazy.channel().as_str()).to_vec();
                let count = producers.len();
                lazy.configure(producers);
                debug!(channel = %lazy.channel(), policy = ?lazy.policy(), producers = count, "lazy source configured");
                MergedChannel {
                    channel: lazy.channel().clone(),
                    policy: lazy.policy(),
                    producers: count,
                }
            })
            .collect()
    }

    fn run_subscribers(&mut self) {
        for mediator in &mut self.mediators {
            if mediator.shape() == Shape::Subscriber && mediator.is_connected() {
                // Failures are logged and recorded on the mediator.
                let _ = mediator.run();
            }
        }
    }

    /// Feed outgoing mediator streams into the consumers registered before
    /// weaving (outbound sinks and other external subscribers).
    fn connect_external_sinks(&mut self, registry: &StreamRegistry) {
        if self.external_sinks.is_empty() {
            return;
        }
        if Handle::try_current().is_err() {
            warn!("no tokio runtime, external sinks are not connected");
            return;
        }
        for (name, &count) in &self.external_sinks {
            let subscribers = registry.subscribers(name.as_str()).get(..count).unwrap_or_default();
            for mediator in self.mediators.iter().filter(|m| m.outgoing() == Some(name)) {
                let stream = match mediator.stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(mediator = %mediator.id(), channel = %name, error = %e, "not connected to sink");
                        continue;
                    }
                };
                if subscribers.len() > 1 {
                    warn!(channel = %name, subscribers = subscribers.len(), "several subscribers consuming the stream");
                }
                for subscriber in subscribers {
                    info!(mediator = %mediator.id(), sink = subscriber.label(), channel = %name, "connecting to sink");
                    self.tasks.push(connect(&stream, subscriber));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::BoxError;
    use crate::domain::message::Message;
    use crate::stream::publisher::{MessageStream, Subscriber};
    use crate::weave::binding::BindingRecord;
    use crate::weave::invoker::Invoker;
    use crate::weave::mediator::MediatorState;
    use futures::StreamExt;
    use futures::stream;
    use rstest::rstest;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct App;

    fn emit(method: &str, channel: &str, values: &[&str]) -> BindingRecord {
        let messages: Vec<Message> = values.iter().map(|v| Message::new(*v)).collect();
        BindingRecord::builder("App", method)
            .outgoing(channel)
            .invoker(Invoker::publisher(move |_: Arc<App>| {
                stream::iter(messages.clone()).boxed()
            }))
            .build()
            .unwrap()
    }

    fn relay(method: &str, incoming: &str, outgoing: &str) -> BindingRecord {
        BindingRecord::builder("App", method)
            .incoming(incoming)
            .outgoing(outgoing)
            .invoker(Invoker::processor(|_: Arc<App>, m: Message| async move {
                Ok::<_, BoxError>(m)
            }))
            .build()
            .unwrap()
    }

    fn sink(method: &str, channel: &str, merge: MergePolicy) -> BindingRecord {
        BindingRecord::builder("App", method)
            .incoming(channel)
            .merge(merge)
            .invoker(Invoker::subscriber(|_: Arc<App>, _m: Message| async {
                Ok::<(), BoxError>(())
            }))
            .build()
            .unwrap()
    }

    fn collecting(label: &str) -> (Subscriber, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let target = Arc::clone(&seen);
        let subscriber = Subscriber::new(label, move |stream: MessageStream| {
            let target = Arc::clone(&target);
            async move {
                let values: Vec<Value> = stream.map(|m| m.payload().value().clone()).collect().await;
                target.lock().unwrap().extend(values);
            }
        });
        (subscriber, seen)
    }

    fn weave(
        mode: WeavingMode,
        records: Vec<BindingRecord>,
        registry: &mut StreamRegistry,
    ) -> (Weaver, Result<WeavingReport, WeavingError>) {
        let mut table = BindingTable::builder();
        for record in records {
            table = table.declare(record).unwrap();
        }
        let mut owners = OwnerRegistry::new();
        owners.register_instance("App", App).unwrap();

        let mut weaver = Weaver::new(mode);
        weaver.initialize(&table.build(), &mut owners, registry);
        let report = weaver.weave(registry);
        (weaver, report)
    }

    fn state_of(weaver: &Weaver, id: &str) -> MediatorState {
        weaver
            .mediators()
            .iter()
            .find(|m| m.id().as_str() == id)
            .map(Mediator::state)
            .unwrap()
    }

    #[tokio::test]
    async fn single_producer_connects_directly() {
        let mut registry = StreamRegistry::new();
        let (weaver, report) = weave(
            WeavingMode::Strict,
            vec![emit("source", "a", &["x"]), relay("relay", "a", "b"), sink("sink", "b", MergePolicy::None)],
            &mut registry,
        );
        let report = report.unwrap();

        assert!(report.is_complete());
        assert_eq!(state_of(&weaver, "App::relay"), MediatorState::Connected);
        assert_eq!(state_of(&weaver, "App::sink"), MediatorState::Running);
        assert_eq!(registry.publishers("b").len(), 1);
    }

    #[tokio::test]
    async fn two_producers_without_merge_policy_are_ambiguous() {
        let mut registry = StreamRegistry::new();
        let (_, report) = weave(
            WeavingMode::Lenient,
            vec![emit("one", "a", &[]), emit("two", "a", &[]), sink("sink", "a", MergePolicy::None)],
            &mut registry,
        );

        assert_eq!(
            report.unwrap_err(),
            WeavingError::AmbiguousBinding {
                channel: "a".into(),
                mediator: MediatorId::new(&"App".into(), "sink"),
                producers: 2,
            }
        );
    }

    #[rstest]
    #[case::one(1, MergePolicy::Merge)]
    #[case::many(3, MergePolicy::Merge)]
    #[case::concat(2, MergePolicy::Concat)]
    #[tokio::test]
    async fn merge_source_gets_every_producer(#[case] producers: usize, #[case] policy: MergePolicy) {
        let mut records: Vec<BindingRecord> = (0..producers)
            .map(|i| emit(&format!("p{i}"), "a", &["x"]))
            .collect();
        records.push(sink("merged", "a", policy));

        let mut registry = StreamRegistry::new();
        let (weaver, report) = weave(WeavingMode::Strict, records, &mut registry);

        assert_eq!(
            report.unwrap().merged,
            vec![MergedChannel {
                channel: "a".into(),
                policy,
                producers,
            }]
        );
        assert_eq!(weaver.lazy_sources()[0].producer_count(), Some(producers));
    }

    #[tokio::test]
    async fn producers_registered_by_later_rounds_join_the_merge() {
        // `late` only produces into "a" once `relay` is connected.
        let mut registry = StreamRegistry::new();
        let (_, report) = weave(
            WeavingMode::Strict,
            vec![
                sink("merged", "a", MergePolicy::Merge),
                relay("relay", "b", "a"),
                emit("early", "a", &[]),
                emit("source", "b", &[]),
            ],
            &mut registry,
        );

        assert_eq!(report.unwrap().merged[0].producers, 2);
    }

    #[tokio::test]
    async fn chain_declared_backwards_resolves_within_m_rounds() {
        let records = vec![
            sink("sink", "c4", MergePolicy::None),
            relay("r4", "c3", "c4"),
            relay("r3", "c2", "c3"),
            relay("r2", "c1", "c2"),
            relay("r1", "c0", "c1"),
            emit("source", "c0", &[]),
        ];
        let m = records.len();

        let mut registry = StreamRegistry::new();
        let (_, report) = weave(WeavingMode::Strict, records, &mut registry);
        let report = report.unwrap();

        assert!(report.rounds <= m);
        assert!(report.unresolved().is_empty());
    }

    #[tokio::test]
    async fn strict_mode_fails_on_unresolved_mediators() {
        let mut registry = StreamRegistry::new();
        let (_, report) = weave(
            WeavingMode::Strict,
            vec![emit("source", "a", &[]), sink("orphan", "missing", MergePolicy::None)],
            &mut registry,
        );

        assert_eq!(
            report.unwrap_err(),
            WeavingError::Unresolved {
                mediators: vec![MediatorId::new(&"App".into(), "orphan")],
                available: vec!["a".into()],
            }
        );
    }

    #[tokio::test]
    async fn lenient_mode_reports_unresolved_mediators() {
        let mut registry = StreamRegistry::new();
        let (weaver, report) = weave(
            WeavingMode::Lenient,
            vec![
                emit("source", "a", &[]),
                sink("ok", "a", MergePolicy::None),
                sink("orphan", "missing", MergePolicy::None),
            ],
            &mut registry,
        );
        let report = report.unwrap();

        assert_eq!(report.unresolved_channels(), vec![ChannelName::from("missing")]);
        assert_eq!(report.unresolved_mediators(), vec![MediatorId::new(&"App".into(), "orphan")]);
        assert_eq!(state_of(&weaver, "App::ok"), MediatorState::Running);
        assert_eq!(state_of(&weaver, "App::orphan"), MediatorState::OwnerBound);
    }

    #[tokio::test]
    async fn failed_owner_is_skipped_and_reported() {
        let record = BindingRecord::builder("Ghost", "listen")
            .incoming("a")
            .invoker(Invoker::subscriber(|_: Arc<App>, _m: Message| async {
                Ok::<(), BoxError>(())
            }))
            .build()
            .unwrap();

        let mut registry = StreamRegistry::new();
        let (weaver, report) = weave(
            WeavingMode::Strict,
            vec![emit("source", "a", &[]), record],
            &mut registry,
        );
        let report = report.unwrap();

        assert_eq!(report.failed, vec![MediatorId::new(&"Ghost".into(), "listen")]);
        assert!(report.unresolved().is_empty());
        assert_eq!(state_of(&weaver, "Ghost::listen"), MediatorState::Failed);
    }

    #[tokio::test]
    async fn owners_of_the_wrong_type_fail_their_mediators() {
        let source = BindingRecord::builder("Src", "emit")
            .outgoing("a")
            .invoker(Invoker::publisher(|_: Arc<App>| stream::empty().boxed()))
            .build()
            .unwrap();
        let listener = BindingRecord::builder("Sink", "listen")
            .incoming("a")
            .invoker(Invoker::subscriber(|_: Arc<App>, _m: Message| async {
                Ok::<(), BoxError>(())
            }))
            .build()
            .unwrap();
        let table = BindingTable::builder()
            .declare(source)
            .unwrap()
            .declare(listener)
            .unwrap()
            .build();
        let mut owners = OwnerRegistry::new();
        owners.register_instance("Src", 7u32).unwrap();
        owners.register_instance("Sink", String::from("not an app")).unwrap();
        let mut registry = StreamRegistry::new();

        let mut weaver = Weaver::new(WeavingMode::Lenient);
        weaver.initialize(&table, &mut owners, &mut registry);
        let report = weaver.weave(&mut registry).unwrap();

        assert_eq!(state_of(&weaver, "Src::emit"), MediatorState::Failed);
        assert_eq!(state_of(&weaver, "Sink::listen"), MediatorState::Failed);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_complete());
        assert!(registry.publishers("a").is_empty());
    }

    #[tokio::test]
    async fn weaving_twice_is_rejected() {
        let mut registry = StreamRegistry::new();
        let (mut weaver, report) = weave(WeavingMode::Strict, vec![emit("source", "a", &[])], &mut registry);
        assert!(report.is_ok());
        assert_eq!(weaver.weave(&mut registry).unwrap_err(), WeavingError::AlreadyWoven);
    }

    #[tokio::test]
    async fn outgoing_streams_reach_every_external_subscriber() {
        let (first, first_seen) = collecting("first");
        let (second, second_seen) = collecting("second");
        let mut registry = StreamRegistry::new();
        registry.register_subscriber("out".into(), first);
        registry.register_subscriber("out".into(), second);

        let (_weaver, report) = weave(
            WeavingMode::Strict,
            vec![emit("source", "in", &["a", "b"]), relay("relay", "in", "out")],
            &mut registry,
        );
        assert!(report.unwrap().is_complete());

        for _ in 0..50 {
            if first_seen.lock().unwrap().len() == 2 && second_seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*first_seen.lock().unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(*second_seen.lock().unwrap(), vec![json!("a"), json!("b")]);
    }
}
