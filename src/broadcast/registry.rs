//! In-process subscriber fan-out.

use super::{Broadcaster, Message, Payload};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

type Callback = Box<dyn Fn(&Message) + Send + Sync>;

/// Handle for a subscription that can be dropped to unsubscribe.
///
/// When the handle is dropped, the subscription is automatically removed.
pub struct SubscriptionHandle {
    id: usize,
    registry: Arc<RwLock<SubscriberRegistryInner>>,
}

impl SubscriptionHandle {
    fn remove(inner: &mut SubscriberRegistryInner, id: usize) {
        inner.subscribers.retain(|sub| sub.id != id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let id = self.id;
        let registry = Arc::clone(&self.registry);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut inner = registry.write().await;
                    Self::remove(&mut inner, id);
                });
            }
            // Outside a runtime nothing else can be holding the lock across an await.
            Err(_) => Self::remove(&mut registry.blocking_write(), id),
        }
    }
}

struct Subscriber {
    id: usize,
    topic: String,
    callback: Callback,
}

/// Internal subscriber registry state.
struct SubscriberRegistryInner {
    subscribers: Vec<Subscriber>,
    next_id: usize,
}

/// Registry of topic subscribers, usable as a [`Broadcaster`].
///
/// Clones share the same subscriber list, so one clone can be handed to a
/// [`DataService`](crate::core::DataService) while another is used to
/// subscribe.
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::broadcast::{Broadcaster, Payload, SubscriberRegistry, MESSAGES};
///
/// # async fn example() -> sheetwatch::error::Result<()> {
/// let registry = SubscriberRegistry::new();
///
/// let handle = registry.subscribe(MESSAGES, |message| {
///     println!("got {:?}", message.payload.text());
/// }).await;
///
/// registry.publish(MESSAGES, Payload::Text("hello".into())).await?;
///
/// // Unsubscribe by dropping the handle
/// drop(handle);
/// # Ok(())
/// # }
/// ```
pub struct SubscriberRegistry {
    inner: Arc<RwLock<SubscriberRegistryInner>>,
}

impl SubscriberRegistry {
    /// Create a new subscriber registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SubscriberRegistryInner {
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Subscribe to messages on `topic`.
    ///
    /// The callback runs on the publishing task, so it should hand off any
    /// slow work. Returns a handle that can be dropped to unsubscribe.
    pub async fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            topic: topic.into(),
            callback: Box::new(callback),
        });

        SubscriptionHandle {
            id,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Deliver a message to every subscriber of its topic.
    ///
    /// Callbacks run in the order they subscribed. Returns how many were called.
    pub async fn deliver(&self, message: &Message) -> usize {
        let inner = self.inner.read().await;
        let mut delivered = 0;
        for sub in inner.subscribers.iter().filter(|s| s.topic == message.topic) {
            (sub.callback)(message);
            delivered += 1;
        }
        delivered
    }

    /// Get the number of active subscribers across all topics.
    pub async fn subscriber_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.subscribers.len()
    }

    /// Get the number of active subscribers on one topic.
    pub async fn topic_subscriber_count(&self, topic: &str) -> usize {
        let inner = self.inner.read().await;
        inner.subscribers.iter().filter(|s| s.topic == topic).count()
    }
}

#[async_trait]
impl Broadcaster for SubscriberRegistry {
    async fn publish(&self, topic: &str, payload: Payload) -> Result<()> {
        let message = Message::new(topic, payload);
        let delivered = self.deliver(&message).await;
        trace!(topic, delivered, "published message");
        Ok(())
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SubscriberRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
