//! Outbound publish/subscribe.
//!
//! [`Broadcaster`] is the seam to whatever transport delivers updates to
//! consumers. [`SubscriberRegistry`] is an in-process implementation that
//! fans messages out to topic-filtered callbacks.

mod message;
mod registry;

pub use message::{Message, Payload};
pub use registry::{SubscriberRegistry, SubscriptionHandle};

use crate::error::Result;
use async_trait::async_trait;

/// Topic carrying every freshly read [`RecordSet`](crate::core::RecordSet).
pub const DATA_UPDATES: &str = "data-updates";

/// Topic carrying free-form text messages.
pub const MESSAGES: &str = "messages";

/// Sink that delivers payloads to subscribers of a topic.
///
/// `publish` is called concurrently from the watcher task and from pull
/// requests, so implementations must be safe to share across tasks.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sheetwatch::broadcast::{Broadcaster, Payload};
/// use sheetwatch::error::Result;
///
/// struct StdoutBroadcaster;
///
/// #[async_trait]
/// impl Broadcaster for StdoutBroadcaster {
///     async fn publish(&self, topic: &str, payload: Payload) -> Result<()> {
///         println!("[{topic}] {}", payload.to_json()?);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver `payload` to every subscriber of `topic`.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the transport rejects the payload.
    async fn publish(&self, topic: &str, payload: Payload) -> Result<()>;
}
