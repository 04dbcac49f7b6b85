//! Runtime - 宣言から稼働中のグラフへ
//!
//! ```text
//! RuntimeBuilder::build ──► Runtime ──start()──► RunningGraph ──shutdown()
//!                           (未接続)    weave      (稼働中, health 照会可)
//! ```
//!
//! `start` は `self` を消費するので、同じ宣言を 2 回 weave することはできません。

use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::health::{HealthReport, HealthReportBuilder};
use crate::observability::GraphStatus;
use crate::outbound::sink::OutboundSink;
use crate::weave::binding::BindingTable;
use crate::weave::mediator::Mediator;
use crate::weave::owner::OwnerRegistry;
use crate::weave::registry::StreamRegistry;
use crate::weave::weaver::{Weaver, WeavingError, WeavingMode, WeavingReport};

use super::builder::{BuildError, RuntimeBuilder};

/// Time given to outbound channels to release their clients when startup fails.
const ABORTED_START_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Weaving(#[from] WeavingError),
}

/// Wired but not yet woven graph.
pub struct Runtime {
    mode: WeavingMode,
    table: BindingTable,
    owners: OwnerRegistry,
    registry: StreamRegistry,
    sinks: Vec<OutboundSink>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn new(
        mode: WeavingMode,
        table: BindingTable,
        owners: OwnerRegistry,
        registry: StreamRegistry,
        sinks: Vec<OutboundSink>,
    ) -> Self {
        Self {
            mode,
            table,
            owners,
            registry,
            sinks,
        }
    }

    pub fn mode(&self) -> WeavingMode {
        self.mode
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.table
    }

    /// Binds every declaration, connects the graph and starts it.
    ///
    /// Must be called from within a tokio runtime: subscriptions are spawned
    /// as tasks. On a weaving error nothing keeps running and the outbound
    /// clients are released.
    pub async fn start(self) -> Result<RunningGraph, RuntimeError> {
        let Runtime {
            mode,
            table,
            mut owners,
            mut registry,
            sinks,
        } = self;

        let mut weaver = Weaver::new(mode);
        weaver.initialize(&table, &mut owners, &mut registry);
        let report = match weaver.weave(&mut registry) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "weaving failed, releasing outbound channels");
                weaver.shutdown();
                join_all(sinks.iter().map(|sink| sink.shutdown(ABORTED_START_GRACE))).await;
                return Err(e.into());
            }
        };

        if !report.is_complete() {
            warn!(
                unresolved = ?report.unresolved_channels(),
                "graph started with unconnected mediators"
            );
        }
        info!(
            mediators = weaver.mediators().len(),
            outgoing = sinks.len(),
            "graph running"
        );
        Ok(RunningGraph {
            weaver,
            registry,
            sinks,
            report,
        })
    }
}

/// A woven, running graph.
pub struct RunningGraph {
    weaver: Weaver,
    registry: StreamRegistry,
    sinks: Vec<OutboundSink>,
    report: WeavingReport,
}

impl RunningGraph {
    pub fn report(&self) -> &WeavingReport {
        &self.report
    }

    pub fn status(&self) -> GraphStatus {
        GraphStatus::collect(&self.report, self.weaver.mediators(), &self.sinks)
    }

    pub fn mediators(&self) -> &[Mediator] {
        self.weaver.mediators()
    }

    /// The resolved graph: producers and consumers per channel.
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn sinks(&self) -> &[OutboundSink] {
        &self.sinks
    }

    pub fn sink(&self, channel: &str) -> Option<&OutboundSink> {
        self.sinks.iter().find(|s| s.channel().as_str() == channel)
    }

    pub fn liveness(&self) -> HealthReport {
        let mut builder = HealthReportBuilder::new();
        for sink in &self.sinks {
            sink.is_alive(&mut builder);
        }
        builder.build()
    }

    /// Every channel is checked; each check is bounded by its own timeout.
    pub async fn readiness(&self) -> HealthReport {
        let mut builder = HealthReportBuilder::new();
        for sink in &self.sinks {
            sink.is_ready(&mut builder).await;
        }
        builder.build()
    }

    /// Drains and closes every outbound channel, then stops the remaining
    /// subscriptions. Returns `false` if some channel did not drain in time.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        info!(outgoing = self.sinks.len(), "shutting down graph");
        let drained = join_all(self.sinks.iter().map(|sink| sink.shutdown(timeout)))
            .await
            .into_iter()
            .all(|ok| ok);
        self.weaver.shutdown();
        drained
    }
}
