//! LazySource - multi-producer source configured after weaving.
//!
//! A consumer with a merge policy is connected to a `LazySource` as soon as one
//! producer shows up for its channel. The actual producer list is only known
//! once the fixed point is reached, so subscribing before
//! [`LazySource::configure`] parks until it happens.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio::sync::watch;

use crate::domain::channel::{ChannelName, MergePolicy};

use super::publisher::{MessageStream, Publisher};

type Producers = Option<Arc<Vec<Publisher>>>;

/// Deferred aggregate of every producer registered for one channel.
///
/// Cloning shares the same slot: configuring one clone configures all.
#[derive(Debug, Clone)]
pub struct LazySource {
    channel: ChannelName,
    policy: MergePolicy,
    slot: Arc<watch::Sender<Producers>>,
}

impl LazySource {
    pub fn new(channel: ChannelName, policy: MergePolicy) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            channel,
            policy,
            slot: Arc::new(slot),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Fix the producer list. Only the first call has an effect; returns
    /// whether this call configured the source.
    pub fn configure(&self, producers: Vec<Publisher>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(Arc::new(producers));
            true
        })
    }

    pub fn is_configured(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Number of configured producers, `None` before configuration.
    pub fn producer_count(&self) -> Option<usize> {
        self.slot.borrow().as_ref().map(|p| p.len())
    }

    /// Publisher handle for the aggregated stream.
    pub fn publisher(&self) -> Publisher {
        let slot = Arc::clone(&self.slot);
        let policy = self.policy;
        Publisher::new(format!("lazy:{}", self.channel), move || {
            let mut rx = slot.subscribe();
            stream::once(async move {
                let producers = rx
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|guard| guard.clone());
                match producers {
                    Some(producers) => combine(policy, &producers),
                    None => stream::empty().boxed(),
                }
            })
            .flatten()
            .boxed()
        })
    }
}

/// Aggregate `producers` according to `policy`. Zero producers yield an
/// empty stream.
fn combine(policy: MergePolicy, producers: &[Publisher]) -> MessageStream {
    match producers {
        [] => stream::empty().boxed(),
        [single] => single.subscribe(),
        many => match policy {
            MergePolicy::Concat => stream::iter(many.to_vec())
                .flat_map(|p| p.subscribe())
                .boxed(),
            MergePolicy::Merge | MergePolicy::None => {
                stream::select_all(many.iter().map(Publisher::subscribe)).boxed()
            }
        },
    }
}
