//! Stream handles: cold publishers, draining subscribers and the lazy
//! multi-producer source.

pub mod lazy;
pub mod publisher;

pub use self::lazy::LazySource;
pub use self::publisher::{MessageStream, Publisher, Subscriber, connect};
