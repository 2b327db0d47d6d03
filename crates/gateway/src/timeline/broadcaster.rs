//! Event Broadcaster (spec.md §4.B) — at most one WebSocket subscriber per
//! conversation, with supersede-on-register and ping/ack liveness checks.
//!
//! The subscriber table is a single mutex over a flat map; sends are
//! dispatched through a bounded channel after the lock is released, so a
//! slow or dead consumer never blocks the event producer (spec.md §5).
//! Modeled on the register/writer-task/cleanup shape of a node WebSocket
//! handler, stripped of any per-connection authentication.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sa_domain::timeline::Timeline;
use serde::Serialize;
use tokio::sync::mpsc;

/// How long a subscriber may go without an outbound send before it's due a
/// ping (spec.md §4.B, §5).
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Missed pongs before a subscriber is dropped as dead.
const MAX_MISSED_ACKS: u32 = 2;

/// Wire frame sent to a subscriber (spec.md §6's WebSocket frame schema).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        conversation_id: String,
        timestamp_ms: i64,
    },
    #[serde(rename = "timeline_update")]
    TimelineUpdate {
        conversation_id: String,
        timeline: Timeline,
    },
    #[serde(rename = "ping")]
    Ping { timestamp_ms: i64 },
    #[serde(rename = "pong")]
    Pong { timestamp_ms: i64 },
    #[serde(rename = "ack")]
    Ack { message: serde_json::Value },
}

/// An instruction to the per-connection writer task: either forward a wire
/// frame, or close the socket with the given code/reason.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: String },
}

struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    last_send: Instant,
    pending_ack: bool,
    missed_acks: u32,
}

/// Owns the single-subscriber-per-conversation table. Cheap to clone
/// (wrap in `Arc` at the call site); all mutation is through `&self`.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `conversation_id`. Any prior
    /// subscriber is sent a close frame (code 1000, reason "superseded")
    /// before being dropped from the table. The new subscriber receives
    /// `connection_established` followed by the current timeline snapshot.
    pub fn register(&self, conversation_id: &str, tx: mpsc::Sender<Outbound>, snapshot: Timeline) {
        let previous = {
            let mut subs = self.subscribers.lock();
            let previous = subs.remove(conversation_id);
            subs.insert(
                conversation_id.to_owned(),
                Subscriber {
                    tx: tx.clone(),
                    last_send: Instant::now(),
                    pending_ack: false,
                    missed_acks: 0,
                },
            );
            previous
        };

        if let Some(previous) = previous {
            let _ = previous.tx.try_send(Outbound::Close {
                code: 1000,
                reason: "superseded".to_owned(),
            });
        }

        let _ = tx.try_send(Outbound::Frame(Frame::ConnectionEstablished {
            conversation_id: conversation_id.to_owned(),
            timestamp_ms: now_ms(),
        }));
        let _ = tx.try_send(Outbound::Frame(Frame::TimelineUpdate {
            conversation_id: conversation_id.to_owned(),
            timeline: snapshot,
        }));
    }

    /// Push a timeline delta to `conversation_id`'s subscriber, if any.
    /// A failed send deregisters the subscriber rather than propagating
    /// the failure to the caller (spec.md §4.B, §5).
    pub fn broadcast(&self, conversation_id: &str, timeline: Timeline) {
        let tx = {
            let mut subs = self.subscribers.lock();
            match subs.get_mut(conversation_id) {
                Some(sub) => {
                    sub.last_send = Instant::now();
                    Some(sub.tx.clone())
                }
                None => None,
            }
        };
        let Some(tx) = tx else { return };

        let frame = Outbound::Frame(Frame::TimelineUpdate {
            conversation_id: conversation_id.to_owned(),
            timeline,
        });
        if tx.try_send(frame).is_err() {
            self.deregister(conversation_id);
        }
    }

    /// Reply to an inbound client message: a `{"type":"ping"}` gets a
    /// `pong` back (spec.md §6, resolving the source's explicit ping→pong
    /// behavior), anything else gets a generic `ack`. Either way, receipt
    /// of inbound traffic counts as a liveness signal.
    pub fn ack_inbound(&self, conversation_id: &str, message: serde_json::Value) {
        self.record_activity(conversation_id);
        let tx = {
            let subs = self.subscribers.lock();
            subs.get(conversation_id).map(|s| s.tx.clone())
        };
        let Some(tx) = tx else { return };

        let is_ping = message.get("type").and_then(|t| t.as_str()) == Some("ping");
        let frame = if is_ping {
            Frame::Pong { timestamp_ms: now_ms() }
        } else {
            Frame::Ack { message }
        };
        let _ = tx.try_send(Outbound::Frame(frame));
    }

    /// Reset missed-ack bookkeeping for `conversation_id` — called whenever
    /// any inbound message (including a pong) is observed.
    pub fn record_activity(&self, conversation_id: &str) {
        let mut subs = self.subscribers.lock();
        if let Some(sub) = subs.get_mut(conversation_id) {
            sub.pending_ack = false;
            sub.missed_acks = 0;
        }
    }

    pub fn deregister(&self, conversation_id: &str) {
        self.subscribers.lock().remove(conversation_id);
    }

    pub fn has_subscriber(&self, conversation_id: &str) -> bool {
        self.subscribers.lock().contains_key(conversation_id)
    }

    /// Count of currently live subscriptions, surfaced by `/api/health`.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Periodic maintenance: ping subscribers idle past `PING_INTERVAL`;
    /// drop any that have missed `MAX_MISSED_ACKS` pongs or whose channel
    /// has closed.
    pub fn tick(&self) {
        let mut dead = Vec::new();
        {
            let mut subs = self.subscribers.lock();
            for (id, sub) in subs.iter_mut() {
                if sub.last_send.elapsed() < PING_INTERVAL {
                    continue;
                }
                if sub.pending_ack {
                    sub.missed_acks += 1;
                }
                if sub.missed_acks >= MAX_MISSED_ACKS {
                    dead.push(id.clone());
                    continue;
                }
                let ping = Outbound::Frame(Frame::Ping {
                    timestamp_ms: now_ms(),
                });
                if sub.tx.try_send(ping).is_err() {
                    dead.push(id.clone());
                    continue;
                }
                sub.last_send = Instant::now();
                sub.pending_ack = true;
            }
        }
        for id in dead {
            self.deregister(&id);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::timeline::Timeline;

    fn timeline() -> Timeline {
        Timeline::new("c1")
    }

    #[tokio::test]
    async fn register_sends_established_then_timeline() {
        let b = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        b.register("c1", tx, timeline());

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            Outbound::Frame(Frame::ConnectionEstablished { .. })
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Outbound::Frame(Frame::TimelineUpdate { .. })));
    }

    #[tokio::test]
    async fn registering_again_supersedes_prior_subscriber() {
        let b = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        b.register("c1", tx1, timeline());
        rx1.recv().await.unwrap();
        rx1.recv().await.unwrap();

        let (tx2, mut rx2) = mpsc::channel(8);
        b.register("c1", tx2, timeline());

        let close = rx1.recv().await.unwrap();
        match close {
            Outbound::Close { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "superseded");
            }
            _ => panic!("expected close frame for superseded subscriber"),
        }
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_current_subscriber() {
        let b = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        b.register("c1", tx1, timeline());
        rx1.recv().await.unwrap();
        rx1.recv().await.unwrap();

        let (tx2, mut rx2) = mpsc::channel(8);
        b.register("c1", tx2, timeline());
        rx1.recv().await.unwrap(); // close frame for rx1
        rx2.recv().await.unwrap();
        rx2.recv().await.unwrap();

        b.broadcast("c1", timeline());
        assert!(rx1.try_recv().is_err());
        assert!(matches!(
            rx2.recv().await.unwrap(),
            Outbound::Frame(Frame::TimelineUpdate { .. })
        ));
    }

    #[tokio::test]
    async fn client_ping_gets_a_pong_not_a_generic_ack() {
        let b = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        b.register("c1", tx, timeline());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        b.ack_inbound("c1", serde_json::json!({ "type": "ping" }));
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(Frame::Pong { .. })));
    }

    #[tokio::test]
    async fn unrecognized_client_message_gets_a_generic_ack() {
        let b = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        b.register("c1", tx, timeline());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        b.ack_inbound("c1", serde_json::json!({ "type": "whatever" }));
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(Frame::Ack { .. })));
    }

    #[tokio::test]
    async fn broadcast_to_unknown_conversation_is_a_no_op() {
        let b = Broadcaster::new();
        b.broadcast("ghost", timeline());
    }

    #[tokio::test]
    async fn tick_pings_idle_subscriber_and_deregisters_after_two_misses() {
        let b = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        b.register("c1", tx, timeline());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        // Force the idle clock without waiting 30s in a test.
        {
            let mut subs = b.subscribers.lock();
            subs.get_mut("c1").unwrap().last_send = Instant::now() - Duration::from_secs(31);
        }
        b.tick();
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(Frame::Ping { .. })));
        assert!(b.has_subscriber("c1"));

        {
            let mut subs = b.subscribers.lock();
            subs.get_mut("c1").unwrap().last_send = Instant::now() - Duration::from_secs(31);
        }
        b.tick();
        assert!(!b.has_subscriber("c1"), "second missed ack should deregister");
    }

    #[tokio::test]
    async fn record_activity_resets_missed_acks() {
        let b = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        b.register("c1", tx, timeline());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        {
            let mut subs = b.subscribers.lock();
            subs.get_mut("c1").unwrap().last_send = Instant::now() - Duration::from_secs(31);
        }
        b.tick();
        rx.recv().await.unwrap(); // ping

        b.record_activity("c1");
        {
            let mut subs = b.subscribers.lock();
            subs.get_mut("c1").unwrap().last_send = Instant::now() - Duration::from_secs(31);
        }
        b.tick();
        assert!(b.has_subscriber("c1"), "activity should have cleared the missed-ack count");
    }
}
