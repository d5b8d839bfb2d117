//! Redis pub/sub transport.
//!
//! Publishes on a multiplexed connection. Receives on a dedicated pub/sub
//! connection owned by a subscriber task: it `SUBSCRIBE`s and `UNSUBSCRIBE`s
//! room channels as the wanted set changes, and when Redis drops the
//! connection it reconnects with backoff and subscribes the whole set again.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use metrics::{counter, gauge};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, RedisResult};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::BusError;
use super::backoff::Backoff;
use super::transport::{BusTransport, Frame};
use crate::metrics::{BUS_CONNECTED, BUS_RECONNECTS_TOTAL};

/// Frames buffered between the subscriber task and the bus.
const FRAME_BUFFER: usize = 1024;

/// [`BusTransport`] over Redis `PUBLISH` / `SUBSCRIBE`.
pub struct RedisTransport {
    client: redis::Client,
    conn: MultiplexedConnection,
    wanted: Arc<watch::Sender<BTreeSet<String>>>,
}

impl RedisTransport {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        let (wanted, _) = watch::channel(BTreeSet::new());
        info!("connected to redis bus");
        Ok(Self {
            client,
            conn,
            wanted: Arc::new(wanted),
        })
    }
}

#[async_trait]
impl BusTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    fn subscribe(&self, channel: &str) {
        let _ = add_channel(&self.wanted, channel);
    }

    fn unsubscribe(&self, channel: &str) {
        let _ = remove_channel(&self.wanted, channel);
    }

    async fn frames(&self) -> Result<BoxStream<'static, Frame>, BusError> {
        let pubsub = self.client.get_async_pubsub().await?;
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let subscriber = Subscriber {
            client: self.client.clone(),
            wanted: self.wanted.subscribe(),
            frames: tx,
            backoff: Backoff::new(),
        };
        let _ = tokio::spawn(subscriber.run(pubsub));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(stream.boxed())
    }
}

fn add_channel(wanted: &watch::Sender<BTreeSet<String>>, channel: &str) -> bool {
    wanted.send_if_modified(|set| set.insert(channel.to_owned()))
}

fn remove_channel(wanted: &watch::Sender<BTreeSet<String>>, channel: &str) -> bool {
    wanted.send_if_modified(|set| set.remove(channel))
}

/// Channels to subscribe and unsubscribe to move from `active` to `wanted`.
fn channel_diff(
    active: &BTreeSet<String>,
    wanted: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let added = wanted.difference(active).cloned().collect();
    let removed = active.difference(wanted).cloned().collect();
    (added, removed)
}

/// Why a pub/sub connection stopped being pumped.
enum Ended {
    /// The frame stream was dropped. Nothing left to feed.
    Closed,
    /// Redis went away.
    Lost(String),
}

enum Event {
    Message(Option<redis::Msg>),
    Changed(bool),
    Closed,
}

/// Owns the pub/sub connection for one frame stream.
struct Subscriber {
    client: redis::Client,
    wanted: watch::Receiver<BTreeSet<String>>,
    frames: mpsc::Sender<Frame>,
    backoff: Backoff,
}

impl Subscriber {
    async fn run(mut self, first: PubSub) {
        let mut next = Some(first);
        loop {
            let pubsub = match next.take() {
                Some(pubsub) => pubsub,
                None => match self.client.get_async_pubsub().await {
                    Ok(pubsub) => {
                        info!("redis pub/sub reconnected");
                        pubsub
                    }
                    Err(err) => {
                        if self.pause(&err.to_string()).await {
                            continue;
                        }
                        return;
                    }
                },
            };

            gauge!(BUS_CONNECTED).set(1.0);
            let ended = self.pump(pubsub).await;
            gauge!(BUS_CONNECTED).set(0.0);

            match ended {
                Ended::Closed => {
                    debug!("bus frame stream dropped, stopping subscriber");
                    return;
                }
                Ended::Lost(reason) => {
                    if !self.pause(&reason).await {
                        return;
                    }
                }
            }
        }
    }

    /// Wait out the next backoff delay. False if the frame stream went away
    /// in the meantime.
    async fn pause(&mut self, reason: &str) -> bool {
        counter!(BUS_RECONNECTS_TOTAL).increment(1);
        let delay = self.backoff.next_delay();
        warn!(reason, ?delay, "redis pub/sub unavailable, reconnecting");
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.frames.closed() => false,
        }
    }

    async fn pump(&mut self, mut pubsub: PubSub) -> Ended {
        let mut active = BTreeSet::new();
        let mut resync = true;
        loop {
            if resync {
                let wanted = self.wanted.borrow_and_update().clone();
                if let Err(err) = sync_channels(&mut pubsub, &mut active, &wanted).await {
                    return Ended::Lost(err.to_string());
                }
                self.backoff.reset();
                resync = false;
            }

            let event = {
                let mut messages = pubsub.on_message();
                tokio::select! {
                    msg = messages.next() => Event::Message(msg),
                    changed = self.wanted.changed() => Event::Changed(changed.is_ok()),
                    () = self.frames.closed() => Event::Closed,
                }
            };

            match event {
                Event::Message(Some(msg)) => {
                    let Some(frame) = to_frame(&msg) else {
                        continue;
                    };
                    if self.frames.send(frame).await.is_err() {
                        return Ended::Closed;
                    }
                }
                Event::Message(None) => return Ended::Lost("pub/sub stream ended".into()),
                Event::Changed(true) => resync = true,
                Event::Changed(false) | Event::Closed => return Ended::Closed,
            }
        }
    }
}

async fn sync_channels(
    pubsub: &mut PubSub,
    active: &mut BTreeSet<String>,
    wanted: &BTreeSet<String>,
) -> RedisResult<()> {
    let (added, removed) = channel_diff(active, wanted);
    for channel in added {
        pubsub.subscribe(channel.as_str()).await?;
        debug!(%channel, "subscribed");
        let _ = active.insert(channel);
    }
    for channel in removed {
        pubsub.unsubscribe(channel.as_str()).await?;
        debug!(%channel, "unsubscribed");
        let _ = active.remove(&channel);
    }
    Ok(())
}

fn to_frame(msg: &redis::Msg) -> Option<Frame> {
    let channel = msg.get_channel_name().to_owned();
    match msg.get_payload::<String>() {
        Ok(payload) => Some(Frame { channel, payload }),
        Err(err) => {
            warn!(channel, error = %err, "dropping non-text pub/sub payload");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn set(channels: &[&str]) -> BTreeSet<String> {
        channels.iter().map(|c| (*c).to_owned()).collect()
    }

    #[test]
    fn diff_subscribes_new_and_drops_stale() {
        let active = set(&["chat.room.1", "chat.room.2"]);
        let wanted = set(&["chat.room.2", "chat.room.3"]);
        let (added, removed) = channel_diff(&active, &wanted);
        assert_eq!(added, vec!["chat.room.3".to_owned()]);
        assert_eq!(removed, vec!["chat.room.1".to_owned()]);
    }

    #[test]
    fn diff_after_reconnect_subscribes_everything() {
        let wanted = set(&["chat.room.1", "chat.room.2"]);
        let (added, removed) = channel_diff(&BTreeSet::new(), &wanted);
        assert_eq!(added.len(), 2);
        assert!(removed.is_empty());
    }

    #[test]
    fn diff_is_empty_when_in_sync() {
        let wanted = set(&["chat.room.7"]);
        let (added, removed) = channel_diff(&wanted, &wanted);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn wanted_changes_wake_the_subscriber() {
        let (wanted, _) = watch::channel(BTreeSet::new());
        let mut rx = wanted.subscribe();

        assert!(add_channel(&wanted, "chat.room.1"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), set(&["chat.room.1"]));

        // Repeats do not wake anyone.
        assert!(!add_channel(&wanted, "chat.room.1"));
        assert!(!rx.has_changed().unwrap());

        assert!(remove_channel(&wanted, "chat.room.1"));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());

        assert!(!remove_channel(&wanted, "chat.room.9"));
    }
}
