//! Invoker - 宣言されたメソッドを呼び出すための型消去レイヤー
//!
//! # 学習ポイント
//! - 3 つの shape ごとの object-safe trait (`PublisherMethod` / `ProcessorMethod` / `SubscriberMethod`)
//! - Type erasure パターン (`TypedProcessor<T, F>` → `dyn ProcessorMethod`)
//! - owner インスタンスは `Arc<dyn Any>` で受け取り、bind 時に型を検査して呼び出し時に downcast
//!
//! Shape dispatch is the [`Invoker`] enum: every place whose behavior differs
//! per shape matches on it exhaustively.

use std::any::{Any, type_name};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::channel::Shape;
use crate::domain::errors::BoxError;
use crate::domain::message::Message;
use crate::stream::publisher::MessageStream;

/// Owner instance handed to every invocation.
pub type OwnerInstance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("owner instance is not a `{expected}`")]
    OwnerType { expected: &'static str },

    #[error("{0}")]
    Failed(BoxError),
}

/// Method exposing an outgoing channel only.
pub trait PublisherMethod: Send + Sync {
    /// Type name of the owner this method expects.
    fn owner_type(&self) -> &'static str;

    fn accepts(&self, owner: &OwnerInstance) -> bool;

    fn produce(&self, owner: &OwnerInstance) -> Result<MessageStream, InvokeError>;
}

/// Method transforming one incoming message into one outgoing message.
#[async_trait]
pub trait ProcessorMethod: Send + Sync {
    /// Type name of the owner this method expects.
    fn owner_type(&self) -> &'static str;

    fn accepts(&self, owner: &OwnerInstance) -> bool;

    async fn process(&self, owner: &OwnerInstance, message: Message) -> Result<Message, InvokeError>;
}

/// Method consuming an incoming channel only.
#[async_trait]
pub trait SubscriberMethod: Send + Sync {
    /// Type name of the owner this method expects.
    fn owner_type(&self) -> &'static str;

    fn accepts(&self, owner: &OwnerInstance) -> bool;

    async fn consume(&self, owner: &OwnerInstance, message: Message) -> Result<(), InvokeError>;
}

/// Callable bound to one declared method.
///
/// # Example
/// ```ignore
/// let upper = Invoker::processor(|_owner: Arc<Upper>, message: Message| async move {
///     let text = message.payload().value().as_str().unwrap_or_default().to_uppercase();
///     Ok(message.with_payload(text))
/// });
/// ```
#[derive(Clone)]
pub enum Invoker {
    Publisher(Arc<dyn PublisherMethod>),
    Processor(Arc<dyn ProcessorMethod>),
    Subscriber(Arc<dyn SubscriberMethod>),
}

impl Invoker {
    pub fn shape(&self) -> Shape {
        match self {
            Invoker::Publisher(_) => Shape::Publisher,
            Invoker::Processor(_) => Shape::Processor,
            Invoker::Subscriber(_) => Shape::Subscriber,
        }
    }

    /// Publisher over an owner of type `T`.
    pub fn publisher<T, F>(produce: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> MessageStream + Send + Sync + 'static,
    {
        Invoker::Publisher(Arc::new(TypedPublisher {
            f: produce,
            _owner: PhantomData,
        }))
    }

    /// Processor over an owner of type `T`.
    pub fn processor<T, F, Fut>(process: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, BoxError>> + Send + 'static,
    {
        Invoker::Processor(Arc::new(TypedProcessor {
            f: process,
            _owner: PhantomData,
        }))
    }

    /// Subscriber over an owner of type `T`.
    pub fn subscriber<T, F, Fut>(consume: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Invoker::Subscriber(Arc::new(TypedSubscriber {
            f: consume,
            _owner: PhantomData,
        }))
    }
}

impl Invoker {
    /// Type name of the owner the bound method was declared over.
    pub fn owner_type(&self) -> &'static str {
        match self {
            Invoker::Publisher(m) => m.owner_type(),
            Invoker::Processor(m) => m.owner_type(),
            Invoker::Subscriber(m) => m.owner_type(),
        }
    }

    /// Whether `owner` can be handed to the bound method.
    pub fn accepts(&self, owner: &OwnerInstance) -> bool {
        match self {
            Invoker::Publisher(m) => m.accepts(owner),
            Invoker::Processor(m) => m.accepts(owner),
            Invoker::Subscriber(m) => m.accepts(owner),
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invoker::{}", self.shape())
    }
}

fn downcast<T: Any + Send + Sync>(owner: &OwnerInstance) -> Result<Arc<T>, InvokeError> {
    Arc::clone(owner)
        .downcast::<T>()
        .map_err(|_| InvokeError::OwnerType {
            expected: type_name::<T>(),
        })
}

struct TypedPublisher<T, F> {
    f: F,
    _owner: PhantomData<fn() -> T>,
}

impl<T, F> PublisherMethod for TypedPublisher<T, F>
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>) -> MessageStream + Send + Sync,
{
    fn owner_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn accepts(&self, owner: &OwnerInstance) -> bool {
        owner.is::<T>()
    }

    fn produce(&self, owner: &OwnerInstance) -> Result<MessageStream, InvokeError> {
        let owner = downcast::<T>(owner)?;
        Ok((self.f)(owner))
    }
}

struct TypedProcessor<T, F> {
    f: F,
    _owner: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> ProcessorMethod for TypedProcessor<T, F>
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Message, BoxError>> + Send,
{
    fn owner_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn accepts(&self, owner: &OwnerInstance) -> bool {
        owner.is::<T>()
    }

    async fn process(&self, owner: &OwnerInstance, message: Message) -> Result<Message, InvokeError> {
        let owner = downcast::<T>(owner)?;
        (self.f)(owner, message).await.map_err(InvokeError::Failed)
    }
}

struct TypedSubscriber<T, F> {
    f: F,
    _owner: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> SubscriberMethod for TypedSubscriber<T, F>
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn owner_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn accepts(&self, owner: &OwnerInstance) -> bool {
        owner.is::<T>()
    }

    async fn consume(&self, owner: &OwnerInstance, message: Message) -> Result<(), InvokeError> {
        let owner = downcast::<T>(owner)?;
        (self.f)(owner, message).await.map_err(InvokeError::Failed)
    }
}
