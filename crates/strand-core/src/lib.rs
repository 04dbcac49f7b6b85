//! strand-core
//!
//! Core building blocks for the Strand reactive messaging runtime.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（channel, message, metadata, record, health, errors）
//! - **ports**: 抽象化レイヤー（BrokerClient, BrokerAdmin, BrokerClientFactory, OutgoingTracer）
//! - **stream**: Publisher / Subscriber ハンドルと LazySource
//! - **weave**: 宣言テーブル、mediator、不動点反復による接続
//! - **outbound**: outbound チャネルの配送パイプライン
//! - **impls**: 実装（InMemoryBroker など開発用）
//! - **app**: 設定、builder、runtime
//! - **observability**: status views

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod outbound;
pub mod ports;
pub mod stream;
pub mod weave;
