//! Subscription Set
//!
//! The names the polling loop reads. The set is an immutable value behind a
//! `watch` channel: the UI side swaps in a new `Arc`, the loop clones the
//! current one at the top of each cycle.

use std::sync::Arc;
use tokio::sync::watch;

/// Ordered, duplicate-free set of requested parameter names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    names: Vec<String>,
}

impl SubscriptionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            let name = name.into();
            let name = name.trim();
            if !name.is_empty() && !set.contains(name) {
                set.names.push(name.to_string());
            }
        }
        set
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Names in the order they were requested
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Case-insensitive membership
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

impl<S: Into<String>> FromIterator<S> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Producer side of the subscription channel
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    sender: Arc<watch::Sender<Arc<SubscriptionSet>>>,
}

impl SubscriptionHandle {
    /// Swap in a new set. Takes effect at the start of the next cycle.
    pub fn replace(&self, set: SubscriptionSet) {
        self.sender.send_replace(Arc::new(set));
    }

    pub fn clear(&self) {
        self.replace(SubscriptionSet::empty());
    }

    pub fn current(&self) -> Arc<SubscriptionSet> {
        self.sender.borrow().clone()
    }
}

/// Create a subscription channel seeded with `initial`
pub fn subscription_channel(
    initial: SubscriptionSet,
) -> (SubscriptionHandle, watch::Receiver<Arc<SubscriptionSet>>) {
    let (sender, receiver) = watch::channel(Arc::new(initial));
    (
        SubscriptionHandle {
            sender: Arc::new(sender),
        },
        receiver,
    )
}
