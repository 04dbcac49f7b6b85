//! Weave - 宣言テーブルからストリームグラフを組み立てる
//!
//! - **binding**: 宣言 (`BindingRecord`) と検証済みテーブル (`BindingTable`)
//! - **invoker**: shape ごとのメソッド呼び出し (型消去)
//! - **owner**: owner インスタンスの factory レジストリ
//! - **registry**: チャネル名 → producer / consumer
//! - **mediator**: 1 宣言 = 1 mediator の状態機械
//! - **weaver**: 不動点反復による接続

pub mod binding;
pub mod invoker;
pub mod mediator;
pub mod owner;
pub mod registry;
pub mod weaver;

pub use self::binding::{
    BindingError, BindingRecord, BindingRecordBuilder, BindingTable, BindingTableBuilder, InvokerSource,
    MediatorId, OwnerRef,
};
pub use self::invoker::{InvokeError, Invoker, OwnerInstance, ProcessorMethod, PublisherMethod, SubscriberMethod};
pub use self::mediator::{Mediator, MediatorError, MediatorState};
pub use self::owner::{OwnerError, OwnerRegistry};
pub use self::registry::StreamRegistry;
pub use self::weaver::{MergedChannel, UnresolvedBinding, Weaver, WeavingError, WeavingMode, WeavingReport};
