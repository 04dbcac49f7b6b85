//! Broker ports - the client library the outbound pipeline delegates to.
//!
//! The runtime never speaks a wire protocol itself. An outbound channel gets a
//! [`BrokerClient`] (and, when readiness checks are on, a [`BrokerAdmin`]) from
//! the single [`BrokerClientFactory`] supplied at startup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::record::{ProducerRecord, RecordMetadata};

/// Flat `key -> value` producer properties, using the broker's own key names
/// (`bootstrap.servers`, `acks`, ...).
pub type ProducerProperties = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker rejected or failed the send. Retried.
    #[error("send failed: {0}")]
    Send(String),

    /// No broker reachable.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The client was already closed.
    #[error("client closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Producer side of the broker client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Submit one record. Resolves once the broker acknowledged or failed it.
    async fn send(&self, record: ProducerRecord) -> Result<RecordMetadata, BrokerError>;

    /// Release the client. Further sends fail with [`BrokerError::Closed`].
    async fn close(&self);
}

/// Metadata side of the broker client, used by readiness checks only.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn list_topics(&self) -> Result<BTreeSet<String>, BrokerError>;

    async fn close(&self);
}

/// Creates clients for outbound channels.
///
/// Exactly one factory is wired into a runtime (`RuntimeBuilder::broker_factory`).
pub trait BrokerClientFactory: Send + Sync {
    fn create_client(
        &self,
        properties: &ProducerProperties,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError>;

    fn create_admin(
        &self,
        properties: &ProducerProperties,
    ) -> Result<Arc<dyn BrokerAdmin>, BrokerError>;
}
