//! Distributed broadcast bus.
//!
//! Carries chat messages between processes as [`DistributedEnvelope`]s, one
//! channel per room. On receive, envelopes addressed away from this process
//! and envelopes already delivered are dropped; the rest go to the single
//! registered delivery function (local fan-out), which the receive loop
//! awaits before taking the next frame.
//!
//! Cross-process delivery is at-most-once. A failed publish is reported to
//! the caller, which logs it; nothing is retried.

mod backoff;
pub mod dedup;
mod redis;
pub mod transport;

pub use self::redis::RedisTransport;
pub use self::transport::{BusTransport, Frame, MemoryBusHub, MemoryTransport};

use std::sync::{Arc, OnceLock};

use dashmap::DashSet;
use futures::StreamExt;
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use parley_core::envelope::DistributedEnvelope;
use parley_core::keys::{room_channel, room_from_channel};
use parley_core::messages::ChatMessage;
use parley_core::{EnvelopeId, ProcessId, RoomId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::dedup::{DedupConfig, DedupWindow};
use crate::metrics::{
    BUS_DUPLICATES_TOTAL, BUS_PUBLISH_ERRORS_TOTAL, BUS_PUBLISHED_TOTAL, BUS_RECEIVED_TOTAL,
    BUS_SELF_EXCLUDED_TOTAL, DEDUP_WINDOW_SIZE, ROOM_SUBSCRIPTIONS_ACTIVE,
};

/// Bus failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Envelope could not be serialized.
    #[error("envelope serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Local delivery hook invoked for each accepted envelope.
pub type DeliveryFn = Arc<dyn Fn(RoomId, ChatMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// What happened to one received envelope or frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Handed to the delivery function.
    Delivered,
    /// This process was the excluded receiver.
    SelfExcluded,
    /// Envelope ID already in the de-duplication window.
    Duplicate,
    /// Frame for a room this process does not listen to.
    NotSubscribed,
    /// Payload was not a valid envelope.
    Malformed,
    /// Channel is not a room channel.
    Ignored,
    /// No delivery function registered yet.
    NoHandler,
}

/// Subscribe/unsubscribe seam used by the room subscription tracker.
///
/// Implemented by [`BroadcastBus`], which forwards changes to its transport.
#[cfg_attr(test, mockall::automock)]
pub trait RoomChannels: Send + Sync {
    /// Start receiving `room`'s channel. Returns `false` if already subscribed.
    fn subscribe(&self, room: RoomId) -> bool;

    /// Stop receiving `room`'s channel. Returns `false` if it was not subscribed.
    fn unsubscribe(&self, room: RoomId) -> bool;
}

/// The per-process end of the distributed bus.
pub struct BroadcastBus {
    process_id: ProcessId,
    transport: Arc<dyn BusTransport>,
    subscribed: DashSet<RoomId>,
    dedup: Arc<DedupWindow>,
    delivery: OnceLock<DeliveryFn>,
}

impl BroadcastBus {
    /// Create a bus for `process_id` over `transport`.
    pub fn new(process_id: ProcessId, transport: Arc<dyn BusTransport>, dedup: &DedupConfig) -> Self {
        Self {
            process_id,
            transport,
            subscribed: DashSet::new(),
            dedup: Arc::new(DedupWindow::new(dedup)),
            delivery: OnceLock::new(),
        }
    }

    /// Register the local delivery function. Only the first registration takes effect.
    pub fn set_delivery(&self, delivery: DeliveryFn) -> bool {
        self.delivery.set(delivery).is_ok()
    }

    /// This process's identity.
    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// The de-duplication window.
    pub fn dedup(&self) -> &Arc<DedupWindow> {
        &self.dedup
    }

    /// Rooms this process currently listens to.
    pub fn subscribed_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.subscribed.iter().map(|room| *room).collect();
        rooms.sort_unstable();
        rooms
    }

    /// Number of rooms this process listens to.
    pub fn subscribed_count(&self) -> usize {
        self.subscribed.len()
    }

    /// Whether this process listens to `room`.
    pub fn is_subscribed(&self, room: RoomId) -> bool {
        self.subscribed.contains(&room)
    }

    /// Wrap `message` in a fresh envelope and publish it on `room`'s channel.
    ///
    /// `exclude` is normally this process, which already delivered locally.
    pub async fn publish(
        &self,
        room: RoomId,
        message: &ChatMessage,
        exclude: Option<ProcessId>,
    ) -> Result<EnvelopeId, BusError> {
        let envelope =
            DistributedEnvelope::wrap(self.process_id.clone(), room, message.clone(), exclude);
        let result = match serde_json::to_string(&envelope) {
            Ok(payload) => self.transport.publish(&room_channel(room), payload).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => {
                counter!(BUS_PUBLISHED_TOTAL).increment(1);
                debug!(%room, envelope_id = %envelope.id, "envelope published");
                Ok(envelope.id)
            }
            Err(err) => {
                counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
                Err(err)
            }
        }
    }

    /// Apply self-exclusion and de-duplication, then deliver locally.
    pub async fn on_receive(&self, envelope: DistributedEnvelope) -> ReceiveOutcome {
        if envelope.excludes(&self.process_id) {
            counter!(BUS_SELF_EXCLUDED_TOTAL).increment(1);
            return ReceiveOutcome::SelfExcluded;
        }
        if self.dedup.contains(&envelope.id) {
            counter!(BUS_DUPLICATES_TOTAL).increment(1);
            debug!(envelope_id = %envelope.id, "duplicate envelope dropped");
            return ReceiveOutcome::Duplicate;
        }
        let Some(deliver) = self.delivery.get() else {
            warn!(envelope_id = %envelope.id, "no delivery function registered, envelope dropped");
            return ReceiveOutcome::NoHandler;
        };

        counter!(BUS_RECEIVED_TOTAL).increment(1);
        deliver(envelope.room_id, envelope.payload).await;
        let _ = self.dedup.record(envelope.id);
        #[allow(clippy::cast_precision_loss)]
        gauge!(DEDUP_WINDOW_SIZE).set(self.dedup.len() as f64);
        ReceiveOutcome::Delivered
    }

    /// Decode a raw frame and pass it to [`Self::on_receive`] if this process
    /// listens to its room.
    pub async fn handle_frame(&self, frame: &Frame) -> ReceiveOutcome {
        let Some(room) = room_from_channel(&frame.channel) else {
            return ReceiveOutcome::Ignored;
        };
        if !self.subscribed.contains(&room) {
            return ReceiveOutcome::NotSubscribed;
        }
        match serde_json::from_str::<DistributedEnvelope>(&frame.payload) {
            Ok(envelope) => self.on_receive(envelope).await,
            Err(err) => {
                warn!(channel = %frame.channel, error = %err, "malformed envelope on bus");
                ReceiveOutcome::Malformed
            }
        }
    }

    /// Open the transport stream and spawn the receive loop.
    ///
    /// The loop ends when `cancel` fires or the transport stream ends.
    /// Transports that reconnect keep their stream open across outages.
    pub async fn start_receiver(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError> {
        let mut frames = self.transport.frames().await?;
        let bus = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frames.next() => {
                        let Some(frame) = frame else {
                            warn!("bus stream ended, cross-process delivery stopped");
                            break;
                        };
                        let _ = bus.handle_frame(&frame).await;
                    }
                    () = cancel.cancelled() => break,
                }
            }
            debug!("bus receiver stopped");
        }))
    }
}

impl RoomChannels for BroadcastBus {
    fn subscribe(&self, room: RoomId) -> bool {
        let added = self.subscribed.insert(room);
        if added {
            self.transport.subscribe(&room_channel(room));
            info!(%room, "subscribed to room channel");
            #[allow(clippy::cast_precision_loss)]
            gauge!(ROOM_SUBSCRIPTIONS_ACTIVE).set(self.subscribed.len() as f64);
        }
        added
    }

    fn unsubscribe(&self, room: RoomId) -> bool {
        let removed = self.subscribed.remove(&room).is_some();
        if removed {
            self.transport.unsubscribe(&room_channel(room));
            info!(%room, "unsubscribed from room channel");
            #[allow(clippy::cast_precision_loss)]
            gauge!(ROOM_SUBSCRIPTIONS_ACTIVE).set(self.subscribed.len() as f64);
        }
        removed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use parley_core::messages::MessageType;
    use parley_core::{MessageId, UserId};

    use super::*;

    fn message(room: RoomId, seq: i64) -> ChatMessage {
        ChatMessage {
            id: MessageId(seq),
            chat_room_id: room,
            sender_id: UserId(1),
            sender_name: "Ada".into(),
            message_type: MessageType::Text,
            content: format!("m{seq}"),
            sequence_number: seq,
            timestamp: Utc::now(),
        }
    }

    fn bus_on(hub: &MemoryBusHub, process: &str) -> Arc<BroadcastBus> {
        Arc::new(BroadcastBus::new(
            ProcessId::from(process),
            Arc::new(hub.transport()),
            &DedupConfig::default(),
        ))
    }

    fn counting(bus: &BroadcastBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        assert!(bus.set_delivery(Arc::new(move |_: RoomId, _: ChatMessage| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(()).boxed()
        })));
        count
    }

    #[tokio::test]
    async fn same_envelope_twice_delivers_once() {
        let bus = bus_on(&MemoryBusHub::default(), "node-b");
        let delivered = counting(&bus);
        let envelope = DistributedEnvelope::wrap(
            ProcessId::from("node-a"),
            RoomId(1),
            message(RoomId(1), 1),
            Some(ProcessId::from("node-a")),
        );

        assert_eq!(bus.on_receive(envelope.clone()).await, ReceiveOutcome::Delivered);
        assert_eq!(bus.on_receive(envelope).await, ReceiveOutcome::Duplicate);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dedup().len(), 1);
    }

    #[tokio::test]
    async fn excluded_process_never_delivers() {
        let bus = bus_on(&MemoryBusHub::default(), "node-a");
        let delivered = counting(&bus);
        let envelope = DistributedEnvelope::wrap(
            ProcessId::from("node-a"),
            RoomId(1),
            message(RoomId(1), 1),
            Some(ProcessId::from("node-a")),
        );

        assert_eq!(bus.on_receive(envelope).await, ReceiveOutcome::SelfExcluded);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert!(bus.dedup().is_empty());
    }

    #[tokio::test]
    async fn receive_without_handler_is_dropped() {
        let bus = bus_on(&MemoryBusHub::default(), "node-a");
        let envelope =
            DistributedEnvelope::wrap(ProcessId::from("node-b"), RoomId(1), message(RoomId(1), 1), None);
        assert_eq!(bus.on_receive(envelope).await, ReceiveOutcome::NoHandler);
    }

    #[tokio::test]
    async fn frames_for_unsubscribed_rooms_are_dropped() {
        let bus = bus_on(&MemoryBusHub::default(), "node-b");
        let delivered = counting(&bus);
        let envelope =
            DistributedEnvelope::wrap(ProcessId::from("node-a"), RoomId(5), message(RoomId(5), 1), None);
        let frame = Frame {
            channel: room_channel(RoomId(5)),
            payload: serde_json::to_string(&envelope).unwrap(),
        };

        assert_eq!(bus.handle_frame(&frame).await, ReceiveOutcome::NotSubscribed);
        assert!(bus.subscribe(RoomId(5)));
        assert_eq!(bus.handle_frame(&frame).await, ReceiveOutcome::Delivered);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_room_channels_are_ignored() {
        let bus = bus_on(&MemoryBusHub::default(), "node-b");
        let frame = Frame {
            channel: "presence.updates".into(),
            payload: "{}".into(),
        };
        assert_eq!(bus.handle_frame(&frame).await, ReceiveOutcome::Ignored);
    }

    #[tokio::test]
    async fn malformed_payload_is_logged_and_dropped() {
        let (logs, _guard) = parley_logging::capture::capture_logs();
        let bus = bus_on(&MemoryBusHub::default(), "node-b");
        let _ = bus.subscribe(RoomId(2));
        let frame = Frame {
            channel: room_channel(RoomId(2)),
            payload: "not json".into(),
        };

        assert_eq!(bus.handle_frame(&frame).await, ReceiveOutcome::Malformed);
        assert!(logs.has_event(tracing::Level::WARN, "malformed envelope"));
    }

    #[test]
    fn subscribe_and_unsubscribe_are_idempotent() {
        let bus = bus_on(&MemoryBusHub::default(), "node-a");
        assert!(!bus.unsubscribe(RoomId(3)));
        assert!(bus.subscribe(RoomId(3)));
        assert!(!bus.subscribe(RoomId(3)));
        assert_eq!(bus.subscribed_rooms(), vec![RoomId(3)]);
        assert!(bus.unsubscribe(RoomId(3)));
        assert_eq!(bus.subscribed_count(), 0);
    }

    #[test]
    fn room_subscriptions_reach_the_transport() {
        let transport = MemoryBusHub::default().transport();
        let bus = BroadcastBus::new(
            ProcessId::from("node-a"),
            Arc::new(transport.clone()),
            &DedupConfig::default(),
        );
        let channel = room_channel(RoomId(7));

        assert!(!transport.is_subscribed(&channel));
        let _ = bus.subscribe(RoomId(7));
        assert!(transport.is_subscribed(&channel));
        let _ = bus.unsubscribe(RoomId(7));
        assert!(!transport.is_subscribed(&channel));
    }

    #[test]
    fn delivery_can_only_be_registered_once() {
        let bus = bus_on(&MemoryBusHub::default(), "node-a");
        assert!(bus.set_delivery(Arc::new(|_: RoomId, _: ChatMessage| {
            futures::future::ready(()).boxed()
        })));
        assert!(!bus.set_delivery(Arc::new(|_: RoomId, _: ChatMessage| {
            futures::future::ready(()).boxed()
        })));
    }

    #[tokio::test]
    async fn publish_reaches_other_process_but_not_publisher() {
        let hub = MemoryBusHub::new(64);
        let node_a = bus_on(&hub, "node-a");
        let node_b = bus_on(&hub, "node-b");
        let a_count = counting(&node_a);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        assert!(node_b.set_delivery(Arc::new(move |room: RoomId, msg: ChatMessage| {
            sink.lock().push((room, msg.sequence_number));
            futures::future::ready(()).boxed()
        })));

        let _ = node_a.subscribe(RoomId(1));
        let _ = node_b.subscribe(RoomId(1));
        let cancel = CancellationToken::new();
        let a_task = node_a.start_receiver(cancel.clone()).await.unwrap();
        let b_task = node_b.start_receiver(cancel.clone()).await.unwrap();

        let id = node_a
            .publish(RoomId(1), &message(RoomId(1), 4), Some(ProcessId::from("node-a")))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while received.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*received.lock(), vec![(RoomId(1), 4)]);
        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert!(node_b.dedup().contains(&id));

        cancel.cancel();
        a_task.await.unwrap();
        b_task.await.unwrap();
    }
}
