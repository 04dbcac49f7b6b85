//! Outbound - チャネルから broker への配送パイプライン
//!
//! - **config**: チャネル設定 (kebab-case, 全項目デフォルトあり)
//! - **record**: topic / partition / key / headers の優先順位解決
//! - **cloudevents**: binary / structured エンコード
//! - **retry**: 指数バックオフ (1s 開始, 20s 上限)
//! - **failures**: 直近 10 件の失敗 (liveness 用)
//! - **sink**: in-flight 上限付きの送信と ack / nack

pub mod cloudevents;
pub mod config;
pub mod failures;
pub mod record;
pub mod retry;
pub mod sink;

pub use self::cloudevents::CloudEventError;
pub use self::config::{CloudEventsMode, ConfigError, OutgoingChannelConfig, STRING_SERIALIZER};
pub use self::failures::{FAILURE_CAPACITY, FailureBuffer};
pub use self::record::RecordFields;
pub use self::retry::RetryPolicy;
pub use self::sink::{DeliveryError, OutboundSink, SinkError};
