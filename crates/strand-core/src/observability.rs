//! Status views for diagnostics.

use serde::{Deserialize, Serialize};

use crate::outbound::sink::OutboundSink;
use crate::weave::mediator::{Mediator, MediatorState};
use crate::weave::weaver::WeavingReport;

/// Mediators per state, plus outbound channel counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatus {
    pub created: usize,
    pub invoker_bound: usize,
    pub owner_bound: usize,
    pub connected: usize,
    pub running: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub merged_channels: usize,
    pub outgoing_channels: usize,
    /// Outbound channels with at least one recent failure.
    pub failing_channels: usize,
}

impl GraphStatus {
    pub fn collect(report: &WeavingReport, mediators: &[Mediator], sinks: &[OutboundSink]) -> Self {
        let mut status = GraphStatus {
            unresolved: report.unresolved().len(),
            merged_channels: report.merged.len(),
            outgoing_channels: sinks.len(),
            failing_channels: sinks.iter().filter(|s| !s.failures().is_empty()).count(),
            ..GraphStatus::default()
        };
        for mediator in mediators {
            match mediator.state() {
                MediatorState::Created => status.created += 1,
                MediatorState::InvokerBound => status.invoker_bound += 1,
                MediatorState::OwnerBound => status.owner_bound += 1,
                MediatorState::Connected => status.connected += 1,
                MediatorState::Running => status.running += 1,
                MediatorState::Failed => status.failed += 1,
            }
        }
        status
    }

    pub fn mediators(&self) -> usize {
        self.created + self.invoker_bound + self.owner_bound + self.connected + self.running + self.failed
    }
}
