//! Mediator - one declared endpoint bound to a live stream stage.
//!
//! ```text
//! Created ─▶ (InvokerBound) ─▶ OwnerBound ─▶ Connected ─▶ Running
//!                                  │             │
//!                                  ▼             ▼
//!                                Failed ◀────────┘
//! ```
//!
//! Publisher-shaped mediators have no incoming channel and count as connected
//! as soon as their owner is bound. A failure only affects the mediator it
//! happened in: it is logged, recorded and the mediator is skipped from then on.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::channel::{ChannelName, Direction, MergePolicy, Shape};
use crate::domain::errors::FailureCause;
use crate::domain::message::Message;
use crate::stream::publisher::{MessageStream, Publisher, Subscriber, connect};

use super::binding::{BindingRecord, InvokerSource, MediatorId, OwnerRef};
use super::invoker::{Invoker, OwnerInstance, SubscriberMethod};
use super::owner::{OwnerError, OwnerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediatorState {
    Created,
    InvokerBound,
    OwnerBound,
    Connected,
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediatorError {
    #[error("{mediator}: owner {owner} is not registered")]
    OwnerNotFound { mediator: MediatorId, owner: OwnerRef },

    #[error("{mediator}: owner {owner} could not be constructed: {reason}")]
    OwnerConstruction {
        mediator: MediatorId,
        owner: OwnerRef,
        reason: String,
    },

    #[error("{mediator}: owner {owner} is not a `{expected}`")]
    OwnerType {
        mediator: MediatorId,
        owner: OwnerRef,
        expected: &'static str,
    },

    #[error("{mediator}: invoker could not be constructed: {reason}")]
    InvokerConstruction { mediator: MediatorId, reason: String },

    #[error("{mediator}: invoker is a {actual}, the declaration is a {expected}")]
    ShapeMismatch {
        mediator: MediatorId,
        expected: Shape,
        actual: Shape,
    },

    #[error("{mediator} is not connected")]
    NotConnected { mediator: MediatorId },

    #[error("{mediator}: cannot {action} in state {state:?}")]
    InvalidState {
        mediator: MediatorId,
        state: MediatorState,
        action: &'static str,
    },

    #[error("{mediator} could not be started: {reason}")]
    Start { mediator: MediatorId, reason: String },
}

pub struct Mediator {
    id: MediatorId,
    record: BindingRecord,
    state: MediatorState,
    invoker: Option<Invoker>,
    owner: Option<OwnerInstance>,
    upstream: Option<Publisher>,
    task: Option<JoinHandle<()>>,
    failure: Option<MediatorError>,
}

impl Mediator {
    pub fn new(record: BindingRecord) -> Self {
        Self {
            id: record.id(),
            record,
            state: MediatorState::Created,
            invoker: None,
            owner: None,
            upstream: None,
            task: None,
            failure: None,
        }
    }

    pub fn id(&self) -> &MediatorId {
        &self.id
    }

    pub fn record(&self) -> &BindingRecord {
        &self.record
    }

    pub fn state(&self) -> MediatorState {
        self.state
    }

    /// Why the mediator failed, if it did.
    pub fn failure(&self) -> Option<&MediatorError> {
        self.failure.as_ref()
    }

    pub fn shape(&self) -> Shape {
        self.record.shape()
    }

    pub fn channels(&self) -> Vec<(ChannelName, Direction)> {
        self.record.directions()
    }

    pub fn incoming(&self) -> Option<&ChannelName> {
        self.record.incoming()
    }

    pub fn outgoing(&self) -> Option<&ChannelName> {
        self.record.outgoing()
    }

    pub fn merge(&self) -> MergePolicy {
        self.record.merge()
    }

    pub fn is_failed(&self) -> bool {
        self.state == MediatorState::Failed
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, MediatorState::Connected | MediatorState::Running)
    }

    /// Attach the invoker. A factory-provided invoker is constructed here and
    /// moves the mediator to `InvokerBound`.
    pub fn bind_invoker(&mut self) -> Result<(), MediatorError> {
        self.expect_state(&[MediatorState::Created], "bind an invoker")?;
        let invoker = match self.record.invoker().clone() {
            InvokerSource::Direct(invoker) => invoker,
            InvokerSource::Factory { factory, .. } => match factory() {
                Ok(invoker) => {
                    self.state = MediatorState::InvokerBound;
                    invoker
                }
                Err(e) => {
                    return Err(self.fail(MediatorError::InvokerConstruction {
                        mediator: self.id.clone(),
                        reason: e.to_string(),
                    }));
                }
            },
        };
        if invoker.shape() != self.shape() {
            return Err(self.fail(MediatorError::ShapeMismatch {
                mediator: self.id.clone(),
                expected: self.shape(),
                actual: invoker.shape(),
            }));
        }
        self.invoker = Some(invoker);
        Ok(())
    }

    /// Resolve the owner instance. Publishers are connected from here on.
    pub fn bind_owner(&mut self, owners: &mut OwnerRegistry) -> Result<(), MediatorError> {
        self.expect_state(
            &[MediatorState::Created, MediatorState::InvokerBound],
            "bind an owner",
        )?;
        let Some(invoker) = self.invoker.clone() else {
            return Err(self.invalid_state("bind an owner before its invoker"));
        };
        let owner = match owners.resolve(self.record.owner()) {
            Ok(owner) => owner,
            Err(e) => {
                let err = self.owner_error(e);
                return Err(self.fail(err));
            }
        };
        if !invoker.accepts(&owner) {
            let err = MediatorError::OwnerType {
                mediator: self.id.clone(),
                owner: self.record.owner().clone(),
                expected: invoker.owner_type(),
            };
            return Err(self.fail(err));
        }
        self.owner = Some(owner);
        self.state = match self.shape() {
            Shape::Publisher => MediatorState::Connected,
            Shape::Processor | Shape::Subscriber => MediatorState::OwnerBound,
        };
        debug!(mediator = %self.id, state = ?self.state, "owner bound");
        Ok(())
    }

    pub fn connect_to_upstream(&mut self, upstream: Publisher) -> Result<(), MediatorError> {
        self.expect_state(&[MediatorState::OwnerBound], "connect to an upstream")?;
        self.upstream = Some(upstream);
        self.state = MediatorState::Connected;
        Ok(())
    }

    /// The stream this mediator produces into its outgoing channel.
    ///
    /// Cold: nothing runs until the returned publisher is subscribed.
    pub fn stream(&self) -> Result<Publisher, MediatorError> {
        if !self.is_connected() {
            return Err(MediatorError::NotConnected {
                mediator: self.id.clone(),
            });
        }
        let (Some(invoker), Some(owner)) = (&self.invoker, &self.owner) else {
            return Err(self.invalid_state("produce a stream"));
        };
        let id = self.id.clone();
        let owner = Arc::clone(owner);
        match invoker {
            Invoker::Publisher(method) => {
                let method = Arc::clone(method);
                Ok(Publisher::new(self.id.to_string(), move || {
                    match method.produce(&owner) {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!(mediator = %id, error = %e, "publisher method failed");
                            stream::empty().boxed()
                        }
                    }
                }))
            }
            Invoker::Processor(method) => {
                let Some(upstream) = self.upstream.clone() else {
                    return Err(MediatorError::NotConnected { mediator: id });
                };
                let method = Arc::clone(method);
                Ok(Publisher::new(self.id.to_string(), move || {
                    let method = Arc::clone(&method);
                    let owner = Arc::clone(&owner);
                    let id = id.clone();
                    upstream
                        .subscribe()
                        .filter_map(move |message| {
                            let method = Arc::clone(&method);
                            let owner = Arc::clone(&owner);
                            let id = id.clone();
                            async move {
                                let input = message.clone();
                                match method.process(&owner, message).await {
                                    Ok(output) => Some(output),
                                    Err(e) => {
                                        warn!(mediator = %id, error = %e, "processing failed, message nacked");
                                        let cause: FailureCause = Arc::new(e);
                                        nack_logged(&id, &input, cause).await;
                                        None
                                    }
                                }
                            }
                        })
                        .boxed()
                }))
            }
            Invoker::Subscriber(_) => Err(self.invalid_state("produce a stream from a subscriber")),
        }
    }

    /// Sink consuming the incoming channel. Each message is acked once the
    /// method returns and nacked when it fails.
    pub fn subscriber(&self) -> Result<Subscriber, MediatorError> {
        let (Some(Invoker::Subscriber(method)), Some(owner)) = (&self.invoker, &self.owner) else {
            return Err(self.invalid_state("expose a subscriber"));
        };
        let method = Arc::clone(method);
        let owner = Arc::clone(owner);
        let id = self.id.clone();
        Ok(Subscriber::new(self.id.to_string(), move |stream: MessageStream| {
            let method = Arc::clone(&method);
            let owner = Arc::clone(&owner);
            let id = id.clone();
            async move {
                stream
                    .for_each(|message| consume_one(method.as_ref(), &owner, &id, message))
                    .await;
                debug!(mediator = %id, "incoming stream completed");
            }
        }))
    }

    /// Start consuming. Only connected subscriber-shaped mediators run; the
    /// others are pulled by whoever subscribes to their stream.
    pub fn run(&mut self) -> Result<(), MediatorError> {
        self.expect_state(&[MediatorState::Connected], "run")?;
        let subscriber = self.subscriber()?;
        let Some(upstream) = self.upstream.clone() else {
            return Err(MediatorError::NotConnected {
                mediator: self.id.clone(),
            });
        };
        if let Err(e) = Handle::try_current() {
            return Err(self.fail(MediatorError::Start {
                mediator: self.id.clone(),
                reason: e.to_string(),
            }));
        }
        self.task = Some(connect(&upstream, &subscriber));
        self.state = MediatorState::Running;
        debug!(mediator = %self.id, "running");
        Ok(())
    }

    /// Stop the running subscription, if any.
    pub fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn expect_state(&self, allowed: &[MediatorState], action: &'static str) -> Result<(), MediatorError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid_state(action))
        }
    }

    fn invalid_state(&self, action: &'static str) -> MediatorError {
        MediatorError::InvalidState {
            mediator: self.id.clone(),
            state: self.state,
            action,
        }
    }

    fn owner_error(&self, e: OwnerError) -> MediatorError {
        match e {
            OwnerError::NotFound(owner) => MediatorError::OwnerNotFound {
                mediator: self.id.clone(),
                owner,
            },
            OwnerError::Construction { owner, reason } => MediatorError::OwnerConstruction {
                mediator: self.id.clone(),
                owner,
                reason,
            },
            OwnerError::AlreadyRegistered(owner) => MediatorError::OwnerConstruction {
                mediator: self.id.clone(),
                reason: format!("owner {owner} is registered twice"),
                owner,
            },
        }
    }

    fn fail(&mut self, err: MediatorError) -> MediatorError {
        error!(mediator = %self.id, error = %err, "mediator failed and is skipped");
        self.state = MediatorState::Failed;
        self.failure = Some(err.clone());
        err
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("id", &self.id)
            .field("shape", &self.shape())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

async fn consume_one(method: &dyn SubscriberMethod, owner: &OwnerInstance, id: &MediatorId, message: Message) {
    let input = message.clone();
    match method.consume(owner, message).await {
        Ok(()) => {
            if let Err(e) = input.ack().await {
                warn!(mediator = %id, error = %e, "ack failed");
            }
        }
        Err(e) => {
            warn!(mediator = %id, error = %e, "subscriber method failed, message nacked");
            nack_logged(id, &input, Arc::new(e)).await;
        }
    }
}

async fn nack_logged(id: &MediatorId, message: &Message, cause: FailureCause) {
    if let Err(e) = message.nack(cause).await {
        warn!(mediator = %id, error = %e, "nack failed");
    }
}
