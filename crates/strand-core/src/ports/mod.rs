//! Ports - 外部コラボレータへの抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。ブローカーのワイヤプロトコルや
//! トレーシングの実装はここでは扱わず、trait 越しに注入されます。
//!
//! - **broker**: 送信 (`BrokerClient`)、トピック一覧 (`BrokerAdmin`)、生成 (`BrokerClientFactory`)
//! - **tracer**: 送信レコードへのトレースコンテキスト注入 (`OutgoingTracer`)

pub mod broker;
pub mod tracer;

pub use self::broker::{BrokerAdmin, BrokerClient, BrokerClientFactory, BrokerError, ProducerProperties};
pub use self::tracer::{NoopTracer, OutgoingTracer};
