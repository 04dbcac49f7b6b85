//! InMemoryBroker - 開発用・テスト用の broker
//!
//! # 学習ポイント
//! - 1 つの共有 state を client / admin / factory の 3 つの port から見せる
//! - 失敗注入 (fail_next_sends, set_unavailable) でリトライや health を再現
//! - std の Mutex は await を跨がない範囲でだけロックする
//!
//! # 使用例
//! ```ignore
//! let broker = InMemoryBroker::new().with_topics(["prices"]);
//! let sink = OutboundSink::new(config, &broker, Arc::new(NoopTracer))?;
//! broker.fail_next_sends(2);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::record::{ProducerRecord, RecordMetadata};
use crate::ports::broker::{BrokerAdmin, BrokerClient, BrokerClientFactory, BrokerError, ProducerProperties};

#[derive(Debug, Default)]
struct State {
    topics: BTreeSet<String>,
    /// topic ごとの受理済みレコード (offset = index)
    records: BTreeMap<String, Vec<ProducerRecord>>,
    fail_next: usize,
    fail_all: bool,
    unavailable: bool,
    send_delay: Duration,
    send_attempts: usize,
    inflight: usize,
    max_inflight: usize,
    client_closes: usize,
    admin_closes: usize,
    /// 残り何個の client 生成を許すか (`None` は無制限)
    client_quota: Option<usize>,
    reject_admins: bool,
    last_properties: Option<ProducerProperties>,
}

/// プロセス内の broker。clone は同じ state を共有する。
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// readiness で見えるトピックを追加
    pub fn with_topics<I, S>(self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for topic in topics {
            self.create_topic(topic);
        }
        self
    }

    pub fn create_topic(&self, topic: impl Into<String>) {
        self.lock().topics.insert(topic.into());
    }

    /// 次の `n` 回の send を失敗させる
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().fail_next = n;
    }

    pub fn fail_all_sends(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// admin の list_topics を失敗させる
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// 次の `n` 個の client 生成だけ成功させ、それ以降は失敗させる
    pub fn allow_clients(&self, n: usize) {
        self.lock().client_quota = Some(n);
    }

    /// admin client の生成を失敗させる
    pub fn reject_admins(&self, reject: bool) {
        self.lock().reject_admins = reject;
    }

    /// send 1 回あたりの応答時間
    pub fn set_send_delay(&self, delay: Duration) {
        self.lock().send_delay = delay;
    }

    /// `topic` に受理されたレコード (送信順)
    pub fn records(&self, topic: &str) -> Vec<ProducerRecord> {
        self.lock().records.get(topic).cloned().unwrap_or_default()
    }

    /// 成功・失敗を問わない send の呼び出し回数
    pub fn send_attempts(&self) -> usize {
        self.lock().send_attempts
    }

    /// 同時に処理中だった send の最大数
    pub fn max_observed_inflight(&self) -> usize {
        self.lock().max_inflight
    }

    pub fn client_close_count(&self) -> usize {
        self.lock().client_closes
    }

    pub fn admin_close_count(&self) -> usize {
        self.lock().admin_closes
    }

    /// 最後に client 生成へ渡された properties
    pub fn last_properties(&self) -> Option<ProducerProperties> {
        self.lock().last_properties.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_send(&self) -> Duration {
        let mut state = self.lock();
        state.send_attempts += 1;
        state.inflight += 1;
        state.max_inflight = state.max_inflight.max(state.inflight);
        state.send_delay
    }

    fn finish_send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError> {
        let mut state = self.lock();
        state.inflight -= 1;
        if state.fail_all {
            return Err(BrokerError::Send(format!("record to {} rejected", record.topic)));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BrokerError::Send(format!("record to {} rejected", record.topic)));
        }
        let topic = record.topic.clone();
        let partition = record.partition.unwrap_or(0);
        let log = state.records.entry(topic.clone()).or_default();
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
        log.push(record);
        Ok(RecordMetadata {
            topic,
            partition,
            offset,
        })
    }
}

/// 1 チャネル分の producer ハンドル
struct InMemoryProducer {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerClient for InMemoryProducer {
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let delay = self.broker.begin_send();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            self.broker.lock().inflight -= 1;
            return Err(BrokerError::Closed);
        }
        self.broker.finish_send(record)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.lock().client_closes += 1;
        }
    }
}

struct InMemoryAdmin {
    broker: InMemoryBroker,
}

#[async_trait]
impl BrokerAdmin for InMemoryAdmin {
    async fn list_topics(&self) -> Result<BTreeSet<String>, BrokerError> {
        let state = self.broker.lock();
        if state.unavailable {
            return Err(BrokerError::Unavailable("no broker answered the metadata request".to_string()));
        }
        Ok(state.topics.clone())
    }

    async fn close(&self) {
        self.broker.lock().admin_closes += 1;
    }
}

impl BrokerClientFactory for InMemoryBroker {
    fn create_client(&self, properties: &ProducerProperties) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        let mut state = self.lock();
        match &mut state.client_quota {
            Some(0) => return Err(BrokerError::Unavailable("client quota exhausted".to_string())),
            Some(left) => *left -= 1,
            None => {}
        }
        state.last_properties = Some(properties.clone());
        drop(state);
        Ok(Arc::new(InMemoryProducer {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn create_admin(&self, _properties: &ProducerProperties) -> Result<Arc<dyn BrokerAdmin>, BrokerError> {
        if self.lock().reject_admins {
            return Err(BrokerError::Unavailable("admin client rejected".to_string()));
        }
        Ok(Arc::new(InMemoryAdmin { broker: self.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Headers;
    use serde_json::json;

    fn record(topic: &str) -> ProducerRecord {
        ProducerRecord {
            topic: topic.to_string(),
            partition: None,
            timestamp: None,
            key: None,
            value: json!("v"),
            headers: Headers::new(),
        }
    }

    #[tokio::test]
    async fn accepted_records_get_increasing_offsets() {
        let broker = InMemoryBroker::new();
        let client = broker.create_client(&ProducerProperties::new()).unwrap();

        let first = client.send(record("t")).await.unwrap();
        let second = client.send(record("t")).await.unwrap();

        assert_eq!((first.offset, second.offset), (0, 1));
        assert_eq!(broker.records("t").len(), 2);
        assert_eq!(broker.send_attempts(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let broker = InMemoryBroker::new();
        let client = broker.create_client(&ProducerProperties::new()).unwrap();
        broker.fail_next_sends(1);

        assert!(matches!(client.send(record("t")).await, Err(BrokerError::Send(_))));
        assert!(client.send(record("t")).await.is_ok());
        assert_eq!(broker.records("t").len(), 1);
    }

    #[tokio::test]
    async fn closed_client_rejects_sends() {
        let broker = InMemoryBroker::new();
        let client = broker.create_client(&ProducerProperties::new()).unwrap();
        client.close().await;
        client.close().await;

        assert_eq!(client.send(record("t")).await, Err(BrokerError::Closed));
        assert_eq!(broker.client_close_count(), 1);
    }

    #[tokio::test]
    async fn admin_lists_created_topics() {
        let broker = InMemoryBroker::new().with_topics(["a", "b"]);
        let admin = broker.create_admin(&ProducerProperties::new()).unwrap();
        assert_eq!(admin.list_topics().await.unwrap().len(), 2);

        broker.set_unavailable(true);
        assert!(matches!(admin.list_topics().await, Err(BrokerError::Unavailable(_))));
    }

    #[test]
    fn client_quota_limits_creations() {
        let broker = InMemoryBroker::new();
        broker.allow_clients(1);
        assert!(broker.create_client(&ProducerProperties::new()).is_ok());
        assert!(matches!(
            broker.create_client(&ProducerProperties::new()),
            Err(BrokerError::Unavailable(_))
        ));

        broker.reject_admins(true);
        assert!(broker.create_admin(&ProducerProperties::new()).is_err());
    }
}
