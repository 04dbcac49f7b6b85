//! Channel names and the small enums attached to every declared endpoint.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a logical stream endpoint.
///
/// Case-sensitive. Producers and consumers share the same key space, so
/// `"orders"` declared as an outgoing channel feeds every `"orders"` consumer
/// (and never `"Orders"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of a channel an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The endpoint consumes the channel.
    In,
    /// The endpoint produces into the channel.
    Out,
}

/// Rule for combining several producers that feed one incoming channel.
///
/// `None` means "no policy declared": a second producer for the channel is an
/// ambiguous binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    #[default]
    None,
    /// Drain producers one after the other, in registration order.
    Concat,
    /// Interleave all producers as items become available.
    Merge,
}

impl MergePolicy {
    pub fn is_declared(self) -> bool {
        !matches!(self, MergePolicy::None)
    }
}

/// The stream stage an endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// Outgoing channel only: produces a stream.
    Publisher,
    /// Incoming channel only: consumes a stream.
    Subscriber,
    /// Both: transforms an incoming stream into an outgoing one.
    Processor,
}

impl Shape {
    /// Shape implied by which channels an endpoint declares.
    pub fn from_channels(has_incoming: bool, has_outgoing: bool) -> Option<Shape> {
        match (has_incoming, has_outgoing) {
            (false, true) => Some(Shape::Publisher),
            (true, false) => Some(Shape::Subscriber),
            (true, true) => Some(Shape::Processor),
            (false, false) => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Publisher => "publisher",
            Shape::Subscriber => "subscriber",
            Shape::Processor => "processor",
        };
        f.write_str(name)
    }
}
