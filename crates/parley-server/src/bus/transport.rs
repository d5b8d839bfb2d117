//! Raw pub/sub transport under the broadcast bus.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::BusError;

/// One message as seen on the wire: the channel it arrived on and its text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Channel name, e.g. `chat.room.4`.
    pub channel: String,
    /// Serialized envelope.
    pub payload: String,
}

/// A pub/sub backend connecting every process.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Start receiving `channel`. Applies to streams already returned by
    /// [`Self::frames`] as well as later ones. Subscribing twice is a no-op.
    fn subscribe(&self, channel: &str);

    /// Stop receiving `channel`. Unknown channels are ignored.
    fn unsubscribe(&self, channel: &str);

    /// Stream of frames for the subscribed channels.
    async fn frames(&self) -> Result<BoxStream<'static, Frame>, BusError>;
}

/// In-process pub/sub hub. Every transport attached to it sees every frame
/// published on a channel it subscribes to, including its own.
#[derive(Clone, Debug)]
pub struct MemoryBusHub {
    sender: broadcast::Sender<Frame>,
}

impl MemoryBusHub {
    /// Create a hub buffering up to `capacity` frames per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attach a new transport (one per simulated process).
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            sender: self.sender.clone(),
            channels: Arc::new(DashSet::new()),
        }
    }
}

impl Default for MemoryBusHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A [`BusTransport`] attached to a [`MemoryBusHub`].
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    sender: broadcast::Sender<Frame>,
    channels: Arc<DashSet<String>>,
}

impl MemoryTransport {
    /// Whether frames on `channel` reach this transport.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        // No subscribers is not an error for pub/sub.
        let _ = self.sender.send(Frame {
            channel: channel.to_owned(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, channel: &str) {
        let _ = self.channels.insert(channel.to_owned());
    }

    fn unsubscribe(&self, channel: &str) {
        let _ = self.channels.remove(channel);
    }

    async fn frames(&self) -> Result<BoxStream<'static, Frame>, BusError> {
        let rx = self.sender.subscribe();
        let channels = Arc::clone(&self.channels);
        let stream = futures::stream::unfold((rx, channels), |(mut rx, channels)| async move {
            loop {
                match rx.recv().await {
                    Ok(frame) if channels.contains(&frame.channel) => {
                        return Some((frame, (rx, channels)));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "in-process bus subscriber lagged, frames dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscribed_transport_sees_the_frame() {
        let hub = MemoryBusHub::new(16);
        let a = hub.transport();
        let b = hub.transport();
        a.subscribe("chat.room.1");
        b.subscribe("chat.room.1");
        let mut a_frames = a.frames().await.unwrap();
        let mut b_frames = b.frames().await.unwrap();

        a.publish("chat.room.1", "hello".into()).await.unwrap();

        let expected = Frame {
            channel: "chat.room.1".into(),
            payload: "hello".into(),
        };
        assert_eq!(a_frames.next().await.unwrap(), expected);
        assert_eq!(b_frames.next().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn unsubscribed_channels_are_not_delivered() {
        let hub = MemoryBusHub::new(16);
        let publisher = hub.transport();
        let listener = hub.transport();
        listener.subscribe("chat.room.2");
        let mut frames = listener.frames().await.unwrap();

        publisher.publish("chat.room.7", "other".into()).await.unwrap();
        publisher.publish("chat.room.2", "mine".into()).await.unwrap();
        assert_eq!(frames.next().await.unwrap().payload, "mine");

        listener.unsubscribe("chat.room.2");
        assert!(!listener.is_subscribed("chat.room.2"));
        publisher.publish("chat.room.2", "late".into()).await.unwrap();
        let next = tokio::time::timeout(std::time::Duration::from_millis(50), frames.next()).await;
        assert!(next.is_err(), "frame delivered after unsubscribe");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let hub = MemoryBusHub::default();
        hub.transport()
            .publish("chat.room.9", "{}".into())
            .await
            .unwrap();
    }
}
