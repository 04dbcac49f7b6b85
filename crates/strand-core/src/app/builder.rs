//! RuntimeBuilder - ランタイムの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - DI コンテナの代わりに factory / instance を明示的に登録

use std::sync::Arc;

use tracing::warn;

use crate::domain::channel::ChannelName;
use crate::domain::errors::BoxError;
use crate::outbound::config::OutgoingChannelConfig;
use crate::outbound::sink::{OutboundSink, SinkError};
use crate::ports::broker::BrokerClientFactory;
use crate::ports::tracer::{NoopTracer, OutgoingTracer};
use crate::stream::{Publisher, Subscriber};
use crate::weave::binding::{BindingError, BindingRecord, BindingTable, BindingTableBuilder};
use crate::weave::owner::{OwnerError, OwnerRegistry};
use crate::weave::registry::StreamRegistry;
use crate::weave::weaver::WeavingMode;

use super::config::RuntimeConfig;
use super::runtime::Runtime;

/// RuntimeBuilder はランタイムを構築
///
/// # 使用例
/// ```ignore
/// let runtime = RuntimeBuilder::new()
///     .config(RuntimeConfig::from_path("strand.json")?)
///     .owner("Pricing", || Ok(Pricing::default()))?
///     .declare(record)?
///     .broker_factory(InMemoryBroker::new())
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 宣言の重複・owner の重複は登録時にエラー
/// - build() 時に broker factory が「ちょうど 1 つ」かをチェック
///   (outgoing チャネルがなければ 0 でもよい)
/// - outgoing チャネルの設定エラーは build() で返す (送信前)
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    mode: Option<WeavingMode>,
    bindings: BindingTableBuilder,
    owners: OwnerRegistry,
    broker_factories: Vec<Arc<dyn BrokerClientFactory>>,
    tracer: Arc<dyn OutgoingTracer>,
    external_publishers: Vec<(ChannelName, Publisher)>,
    external_subscribers: Vec<(ChannelName, Subscriber)>,
}

/// BuildError はランタイム構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no broker client factory supplied for outgoing channels {0:?}")]
    MissingBrokerFactory(Vec<ChannelName>),

    #[error("{0} broker client factories supplied, exactly one is expected")]
    AmbiguousBrokerFactory(usize),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Owner(#[from] OwnerError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl RuntimeBuilder {
    /// 新しい RuntimeBuilder を作成
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            mode: None,
            bindings: BindingTable::builder(),
            owners: OwnerRegistry::new(),
            broker_factories: Vec::new(),
            tracer: Arc::new(NoopTracer),
            external_publishers: Vec::new(),
            external_subscribers: Vec::new(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 設定ファイルの `strict-binding` より優先される
    pub fn mode(mut self, mode: WeavingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// 宣言を 1 つ追加
    pub fn declare(mut self, record: BindingRecord) -> Result<Self, BuildError> {
        self.bindings = self.bindings.declare(record)?;
        Ok(self)
    }

    /// 初回使用時に構築される owner を登録
    pub fn owner<T, F>(mut self, name: &str, factory: F) -> Result<Self, BuildError>
    where
        T: std::any::Any + Send + Sync,
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.owners.register(name, factory)?;
        Ok(self)
    }

    /// 構築済みの owner を登録
    pub fn owner_instance<T>(mut self, name: &str, instance: T) -> Result<Self, BuildError>
    where
        T: std::any::Any + Send + Sync,
    {
        self.owners.register_instance(name, instance)?;
        Ok(self)
    }

    pub fn outgoing(mut self, channel: OutgoingChannelConfig) -> Self {
        self.config = self.config.with_outgoing(channel);
        self
    }

    /// broker client factory を登録 (build 時に 1 つだけであること)
    pub fn broker_factory(mut self, factory: impl BrokerClientFactory + 'static) -> Self {
        self.broker_factories.push(Arc::new(factory));
        self
    }

    pub fn tracer(mut self, tracer: impl OutgoingTracer + 'static) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// 宣言の外にある producer (inbound connector など)
    pub fn external_publisher(mut self, channel: impl Into<ChannelName>, publisher: Publisher) -> Self {
        self.external_publishers.push((channel.into(), publisher));
        self
    }

    /// 宣言の外にある consumer
    pub fn external_subscriber(mut self, channel: impl Into<ChannelName>, subscriber: Subscriber) -> Self {
        self.external_subscribers.push((channel.into(), subscriber));
        self
    }

    /// RuntimeBuilder を構築して Runtime を生成
    ///
    /// # 検証
    /// - broker factory が 2 つ以上 → AmbiguousBrokerFactory
    /// - outgoing チャネルがあるのに factory がない → MissingBrokerFactory
    /// - チャネル設定の検証 (structured cloud events の serializer など) → Sink
    ///   (client を 1 つも作る前に全チャネルを検証)
    /// - client 生成が途中で失敗したら、作成済みのチャネルを閉じてから返す
    pub fn build(self) -> Result<Runtime, BuildError> {
        let mode = self.mode.unwrap_or_else(|| self.config.weaving_mode());

        if self.broker_factories.len() > 1 {
            return Err(BuildError::AmbiguousBrokerFactory(self.broker_factories.len()));
        }
        let factory = self.broker_factories.into_iter().next();
        if factory.is_none() && !self.config.outgoing.is_empty() {
            return Err(BuildError::MissingBrokerFactory(
                self.config.outgoing.keys().cloned().collect(),
            ));
        }

        let mut registry = StreamRegistry::new();
        for (channel, publisher) in self.external_publishers {
            registry.register_publisher(channel, publisher);
        }
        for (channel, subscriber) in self.external_subscribers {
            registry.register_subscriber(channel, subscriber);
        }

        // 全チャネルを検証してから client を作る
        for channel in self.config.outgoing.values() {
            channel.validate().map_err(SinkError::from)?;
        }

        let mut sinks: Vec<OutboundSink> = Vec::with_capacity(self.config.outgoing.len());
        if let Some(factory) = factory {
            for channel in self.config.outgoing.into_values() {
                match OutboundSink::new(channel, factory.as_ref(), Arc::clone(&self.tracer)) {
                    Ok(sink) => sinks.push(sink),
                    Err(e) => {
                        warn!(error = %e, created = sinks.len(), "outbound channel failed, releasing the others");
                        sinks.into_iter().for_each(OutboundSink::discard);
                        return Err(e.into());
                    }
                }
            }
        }
        for sink in &sinks {
            registry.register_subscriber(sink.channel().clone(), sink.subscriber());
        }

        Ok(Runtime::new(mode, self.bindings.build(), self.owners, registry, sinks))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBroker;
    use crate::outbound::config::{CloudEventsMode, ConfigError};
    use crate::weave::invoker::Invoker;
    use futures::{StreamExt, stream};

    struct Source;

    fn emitter(method: &str) -> BindingRecord {
        BindingRecord::builder("Source", method)
            .outgoing("out")
            .invoker(Invoker::publisher(|_: Arc<Source>| stream::empty().boxed()))
            .build()
            .unwrap()
    }

    #[test]
    fn build_without_outgoing_channels_needs_no_factory() {
        let runtime = RuntimeBuilder::new()
            .owner_instance("Source", Source)
            .unwrap()
            .declare(emitter("emit"))
            .unwrap()
            .build();
        assert!(runtime.is_ok());
    }

    #[test]
    fn build_missing_broker_factory() {
        let result = RuntimeBuilder::new()
            .outgoing(OutgoingChannelConfig::new("out"))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingBrokerFactory(channels)) if channels == vec![ChannelName::from("out")]
        ));
    }

    #[test]
    fn build_ambiguous_broker_factory() {
        let result = RuntimeBuilder::new()
            .broker_factory(InMemoryBroker::new())
            .broker_factory(InMemoryBroker::new())
            .build();
        assert!(matches!(result, Err(BuildError::AmbiguousBrokerFactory(2))));
    }

    #[test]
    fn duplicate_declaration_fails_fast() {
        let result = RuntimeBuilder::new()
            .declare(emitter("emit"))
            .unwrap()
            .declare(emitter("emit"));
        assert!(matches!(result, Err(BuildError::Binding(BindingError::Duplicate(_)))));
    }

    #[test]
    fn duplicate_owner_fails_fast() {
        let result = RuntimeBuilder::new()
            .owner_instance("Source", Source)
            .unwrap()
            .owner("Source", || Ok(Source));
        assert!(matches!(result, Err(BuildError::Owner(OwnerError::AlreadyRegistered(_)))));
    }

    #[test]
    fn invalid_channel_configuration_fails_the_build() {
        let broker = InMemoryBroker::new();
        let mut channel = OutgoingChannelConfig::new("out");
        channel.cloud_events_mode = CloudEventsMode::Structured;
        channel.value_serializer = "io.example.ByteArraySerializer".to_string();

        let result = RuntimeBuilder::new()
            .outgoing(channel)
            .broker_factory(broker.clone())
            .build();

        assert!(matches!(
            result,
            Err(BuildError::Sink(SinkError::Config(ConfigError::InvalidStructuredSerializer { .. })))
        ));
        assert_eq!(broker.send_attempts(), 0);
    }

    fn structured_avro(name: &str) -> OutgoingChannelConfig {
        let mut channel = OutgoingChannelConfig::new(name);
        channel.cloud_events_mode = CloudEventsMode::Structured;
        channel.value_serializer = "io.example.Avro".to_string();
        channel
    }

    #[test]
    fn invalid_later_channel_creates_no_client() {
        let broker = InMemoryBroker::new();

        let result = RuntimeBuilder::new()
            .outgoing(OutgoingChannelConfig::new("a"))
            .outgoing(structured_avro("b"))
            .broker_factory(broker.clone())
            .build();

        assert!(matches!(result, Err(BuildError::Sink(SinkError::Config(_)))));
        assert!(broker.last_properties().is_none());
        assert_eq!(broker.client_close_count(), 0);
    }

    #[test]
    fn client_failure_releases_channels_already_created() {
        let broker = InMemoryBroker::new();
        broker.allow_clients(1);

        let result = RuntimeBuilder::new()
            .outgoing(OutgoingChannelConfig::new("a"))
            .outgoing(OutgoingChannelConfig::new("b"))
            .broker_factory(broker.clone())
            .build();

        assert!(matches!(
            result,
            Err(BuildError::Sink(SinkError::Client { channel, .. })) if channel == ChannelName::from("b")
        ));
        assert_eq!(broker.client_close_count(), 1);
        assert_eq!(broker.admin_close_count(), 1);
    }

    #[tokio::test]
    async fn client_failure_inside_a_runtime_releases_in_the_background() {
        let broker = InMemoryBroker::new();
        broker.allow_clients(1);

        let result = RuntimeBuilder::new()
            .outgoing(OutgoingChannelConfig::new("a"))
            .outgoing(OutgoingChannelConfig::new("b"))
            .broker_factory(broker.clone())
            .build();
        assert!(result.is_err());

        for _ in 0..10 {
            if broker.client_close_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.client_close_count(), 1);
    }

    #[test]
    fn explicit_mode_wins_over_configuration() {
        let config = RuntimeConfig {
            strict_binding: true,
            ..RuntimeConfig::default()
        };
        let runtime = RuntimeBuilder::new()
            .config(config)
            .mode(WeavingMode::Lenient)
            .build()
            .unwrap();
        assert_eq!(runtime.mode(), WeavingMode::Lenient);
    }
}
