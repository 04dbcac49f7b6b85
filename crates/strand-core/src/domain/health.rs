//! Health report entries appended by outbound channels.

use serde::Serialize;

use super::channel::ChannelName;

/// Health of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel: ChannelName,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a liveness or readiness query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    channels: Vec<ChannelInfo>,
}

impl HealthReport {
    pub fn builder() -> HealthReportBuilder {
        HealthReportBuilder::default()
    }

    /// `true` when every channel reported healthy (vacuously for no channels).
    pub fn is_ok(&self) -> bool {
        self.channels.iter().all(|c| c.healthy)
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.channel.as_str() == name)
    }
}

/// Collects channel entries during a health query.
#[derive(Debug, Clone, Default)]
pub struct HealthReportBuilder {
    channels: Vec<ChannelInfo>,
}

impl HealthReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: &ChannelName, healthy: bool) -> &mut Self {
        self.channels.push(ChannelInfo {
            channel: channel.clone(),
            healthy,
            message: None,
        });
        self
    }

    pub fn add_with_message(
        &mut self,
        channel: &ChannelName,
        healthy: bool,
        message: impl Into<String>,
    ) -> &mut Self {
        self.channels.push(ChannelInfo {
            channel: channel.clone(),
            healthy,
            message: Some(message.into()),
        });
        self
    }

    pub fn build(self) -> HealthReport {
        HealthReport {
            channels: self.channels,
        }
    }
}
