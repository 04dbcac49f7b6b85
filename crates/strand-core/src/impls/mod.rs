//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryBroker**: BrokerClient / BrokerAdmin / BrokerClientFactory の
//!   プロセス内実装（失敗注入つき）
//!
//! # 本番用実装
//! 実際の broker クライアントは別クレートで `BrokerClientFactory` を実装し、
//! `RuntimeBuilder::broker_factory` で 1 つだけ渡します。

pub mod inmem_broker;

pub use self::inmem_broker::InMemoryBroker;
