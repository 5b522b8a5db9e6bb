//! Event Channel
//!
//! A namespaced publish/subscribe primitive. Topics are dotted strings
//! (`atoms.user.update`); listeners subscribe to one exact topic and a whole
//! namespace (`atoms.user`) can be dropped in one call.
//!
//! # Dispatch
//!
//! `trigger` snapshots the listener list for the topic and releases the lock
//! before calling anything, so listeners may freely subscribe, unsubscribe or
//! trigger again. Listeners run in registration order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

/// Unique identifier for a subscription.
///
/// Used to remove exactly one listener regardless of how many siblings were
/// added or removed in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every subscribe-style call.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: SubscriptionId,
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriptionId, cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id,
            cancel: Box::new(cancel),
        }
    }

    /// Get the subscription's unique ID.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving events. Calling it more than once is harmless.
    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;
type ListenerList<P> = SmallVec<[(SubscriptionId, Listener<P>); 4]>;
type Topics<P> = RwLock<IndexMap<String, ListenerList<P>>>;

/// A namespaced event channel carrying payloads of type `P`.
pub struct EventChannel<P> {
    topics: Arc<Topics<P>>,
}

impl<P: 'static> EventChannel<P> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Register `listener` on `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriptionId::new();

        self.topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        let topics: Weak<Topics<P>> = Arc::downgrade(&self.topics);
        Subscription::new(id, move || {
            if let Some(topics) = topics.upgrade() {
                remove_listener(&topics, &topic, id);
            }
        })
    }

    /// Deliver `payload` to every listener on `topic`.
    ///
    /// Returns the number of listeners invoked.
    pub fn trigger(&self, topic: &str, payload: &P) -> usize {
        let listeners: Vec<Listener<P>> = match self.topics.read().get(topic) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return 0,
        };

        trace!(topic, listeners = listeners.len(), "trigger");
        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }

    /// Remove a single listener.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        remove_listener(&self.topics, topic, id);
    }

    /// Remove every listener whose topic is `namespace` or lives under it.
    ///
    /// Matching is segment-aware: `atoms.user` covers `atoms.user.update`
    /// but not `atoms.user2.update`. Returns the number of topics dropped.
    pub fn unsubscribe_namespace(&self, namespace: &str) -> usize {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|topic, _| !in_namespace(topic, namespace));
        before - topics.len()
    }

    /// Number of listeners currently registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |list| list.len())
    }

    /// Number of topics with at least one listener.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

impl<P: 'static> Default for EventChannel<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for EventChannel<P> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<P> fmt::Debug for EventChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.read();
        f.debug_struct("EventChannel")
            .field("topics", &topics.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn remove_listener<P>(topics: &Topics<P>, topic: &str, id: SubscriptionId) {
    let mut topics = topics.write();
    let emptied = match topics.get_mut(topic) {
        Some(list) => {
            list.retain(|(existing, _)| *existing != id);
            list.is_empty()
        }
        None => false,
    };
    if emptied {
        topics.shift_remove(topic);
    }
}

fn in_namespace(topic: &str, namespace: &str) -> bool {
    match topic.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
