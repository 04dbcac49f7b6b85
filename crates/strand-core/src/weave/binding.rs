//! Binding metadata table - every declared endpoint, collected once at startup.
//!
//! # Design
//! - 宣言は `BindingRecord::builder()` で 1 件ずつ作り、`build()` 時に検証する
//! - `BindingTable` は重複 (owner, method) を拒否し、構築後は不変
//! - shape は宣言されたチャネルから決まり、invoker の shape と一致しなければならない

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::domain::channel::{ChannelName, Direction, MergePolicy, Shape};
use crate::domain::errors::BoxError;

use super::invoker::Invoker;

/// Name of the component that owns declared methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerRef(String);

impl OwnerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a mediator in logs and reports: `owner::method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MediatorId(String);

impl MediatorId {
    pub fn new(owner: &OwnerRef, method: &str) -> Self {
        Self(format!("{owner}::{method}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type InvokerFactory = Arc<dyn Fn() -> Result<Invoker, BoxError> + Send + Sync>;

/// Where a mediator gets its invoker from.
#[derive(Clone)]
pub enum InvokerSource {
    /// Ready-made invoker.
    Direct(Invoker),
    /// Invoker constructed when the mediator binds it. Construction may fail,
    /// which fails only that mediator.
    Factory { shape: Shape, factory: InvokerFactory },
}

impl InvokerSource {
    pub fn shape(&self) -> Shape {
        match self {
            InvokerSource::Direct(invoker) => invoker.shape(),
            InvokerSource::Factory { shape, .. } => *shape,
        }
    }
}

impl fmt::Debug for InvokerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokerSource::Direct(invoker) => f.debug_tuple("Direct").field(invoker).finish(),
            InvokerSource::Factory { shape, .. } => {
                f.debug_struct("Factory").field("shape", shape).finish_non_exhaustive()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("{mediator} declares neither an incoming nor an outgoing channel")]
    NoChannels { mediator: MediatorId },

    #[error("{mediator} has no invoker")]
    MissingInvoker { mediator: MediatorId },

    #[error("{mediator} declares a {declared} but its invoker is a {invoker}")]
    ShapeMismatch {
        mediator: MediatorId,
        declared: Shape,
        invoker: Shape,
    },

    #[error("{mediator} declares a merge policy without an incoming channel")]
    MergeWithoutIncoming { mediator: MediatorId },

    #[error("{0} is declared twice")]
    Duplicate(MediatorId),
}

/// One declared endpoint. Immutable once built.
#[derive(Debug, Clone)]
pub struct BindingRecord {
    owner: OwnerRef,
    method: String,
    incoming: Option<ChannelName>,
    outgoing: Option<ChannelName>,
    merge: MergePolicy,
    shape: Shape,
    invoker: InvokerSource,
}

impl BindingRecord {
    pub fn builder(owner: impl Into<OwnerRef>, method: impl Into<String>) -> BindingRecordBuilder {
        BindingRecordBuilder {
            owner: owner.into(),
            method: method.into(),
            incoming: None,
            outgoing: None,
            merge: MergePolicy::None,
            invoker: None,
        }
    }

    pub fn id(&self) -> MediatorId {
        MediatorId::new(&self.owner, &self.method)
    }

    pub fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn incoming(&self) -> Option<&ChannelName> {
        self.incoming.as_ref()
    }

    pub fn outgoing(&self) -> Option<&ChannelName> {
        self.outgoing.as_ref()
    }

    pub fn merge(&self) -> MergePolicy {
        self.merge
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn invoker(&self) -> &InvokerSource {
        &self.invoker
    }

    /// Every declared channel with its direction, incoming first.
    pub fn directions(&self) -> Vec<(ChannelName, Direction)> {
        let incoming = self.incoming.iter().map(|c| (c.clone(), Direction::In));
        let outgoing = self.outgoing.iter().map(|c| (c.clone(), Direction::Out));
        incoming.chain(outgoing).collect()
    }
}

/// Builder for [`BindingRecord`].
///
/// # Example
/// ```ignore
/// let record = BindingRecord::builder("Pricer", "convert")
///     .incoming("prices")
///     .outgoing("eur-prices")
///     .merge(MergePolicy::Merge)
///     .invoker(Invoker::processor(convert))
///     .build()?;
/// ```
pub struct BindingRecordBuilder {
    owner: OwnerRef,
    method: String,
    incoming: Option<ChannelName>,
    outgoing: Option<ChannelName>,
    merge: MergePolicy,
    invoker: Option<InvokerSource>,
}

impl BindingRecordBuilder {
    pub fn incoming(mut self, channel: impl Into<ChannelName>) -> Self {
        self.incoming = Some(channel.into());
        self
    }

    pub fn outgoing(mut self, channel: impl Into<ChannelName>) -> Self {
        self.outgoing = Some(channel.into());
        self
    }

    pub fn merge(mut self, policy: MergePolicy) -> Self {
        self.merge = policy;
        self
    }

    pub fn invoker(mut self, invoker: Invoker) -> Self {
        self.invoker = Some(InvokerSource::Direct(invoker));
        self
    }

    /// Construct the invoker lazily, when the mediator binds it.
    pub fn invoker_factory<F>(mut self, shape: Shape, factory: F) -> Self
    where
        F: Fn() -> Result<Invoker, BoxError> + Send + Sync + 'static,
    {
        self.invoker = Some(InvokerSource::Factory {
            shape,
            factory: Arc::new(factory),
        });
        self
    }

    pub fn build(self) -> Result<BindingRecord, BindingError> {
        let mediator = MediatorId::new(&self.owner, &self.method);
        let shape = Shape::from_channels(self.incoming.is_some(), self.outgoing.is_some())
            .ok_or_else(|| BindingError::NoChannels {
                mediator: mediator.clone(),
            })?;
        let invoker = self.invoker.ok_or_else(|| BindingError::MissingInvoker {
            mediator: mediator.clone(),
        })?;
        if invoker.shape() != shape {
            return Err(BindingError::ShapeMismatch {
                mediator,
                declared: shape,
                invoker: invoker.shape(),
            });
        }
        if self.merge.is_declared() && self.incoming.is_none() {
            return Err(BindingError::MergeWithoutIncoming { mediator });
        }
        Ok(BindingRecord {
            owner: self.owner,
            method: self.method,
            incoming: self.incoming,
            outgoing: self.outgoing,
            merge: self.merge,
            shape,
            invoker,
        })
    }
}

/// All declared endpoints, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    records: Vec<BindingRecord>,
}

impl BindingTable {
    pub fn builder() -> BindingTableBuilder {
        BindingTableBuilder::default()
    }

    pub fn records(&self) -> &[BindingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BindingTableBuilder {
    records: Vec<BindingRecord>,
    ids: BTreeSet<MediatorId>,
}

impl BindingTableBuilder {
    /// Add a record. The same `owner::method` may only be declared once.
    pub fn declare(mut self, record: BindingRecord) -> Result<Self, BindingError> {
        let id = record.id();
        if !self.ids.insert(id.clone()) {
            return Err(BindingError::Duplicate(id));
        }
        self.records.push(record);
        Ok(self)
    }

    pub fn build(self) -> BindingTable {
        BindingTable {
            records: self.records,
        }
    }
}
