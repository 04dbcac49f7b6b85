//! App - アプリケーション層
//!
//! weave / outbound / ports を組み合わせてランタイムを組み立てます。
//!
//! # 主要コンポーネント
//! - **RuntimeConfig**: JSON 設定 (`strict-binding`, `outgoing.<channel>`)
//! - **RuntimeBuilder**: 宣言・owner・broker factory のワイヤリング
//! - **Runtime**: weave して `RunningGraph` を起動

pub mod builder;
pub mod config;
pub mod runtime;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::config::{RuntimeConfig, STRICT_BINDING_ENV};
pub use self::runtime::{Runtime, RuntimeError, RunningGraph};
