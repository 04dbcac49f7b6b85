//! StreamRegistry - channel name → registered producers and consumers.
//!
//! Mutated only while the graph is woven (`&mut`), read-only afterwards.
//! Append-only: handles are never removed or reordered.

use std::collections::BTreeMap;

use crate::domain::channel::ChannelName;
use crate::stream::publisher::{Publisher, Subscriber};

#[derive(Debug, Clone, Default)]
struct ChannelEntry {
    publishers: Vec<Publisher>,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    channels: BTreeMap<ChannelName, ChannelEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_publisher(&mut self, channel: ChannelName, publisher: Publisher) {
        self.channels.entry(channel).or_default().publishers.push(publisher);
    }

    pub fn register_subscriber(&mut self, channel: ChannelName, subscriber: Subscriber) {
        self.channels.entry(channel).or_default().subscribers.push(subscriber);
    }

    /// Producers for `channel`, in registration order.
    pub fn publishers(&self, channel: &str) -> &[Publisher] {
        self.channels
            .get(channel)
            .map(|entry| entry.publishers.as_slice())
            .unwrap_or_default()
    }

    /// Consumers for `channel`, in registration order.
    pub fn subscribers(&self, channel: &str) -> &[Subscriber] {
        self.channels
            .get(channel)
            .map(|entry| entry.subscribers.as_slice())
            .unwrap_or_default()
    }

    /// Channels with at least one producer.
    pub fn publisher_names(&self) -> Vec<ChannelName> {
        self.channels
            .iter()
            .filter(|(_, entry)| !entry.publishers.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Channels with at least one consumer.
    pub fn subscriber_names(&self) -> Vec<ChannelName> {
        self.channels
            .iter()
            .filter(|(_, entry)| !entry.subscribers.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
