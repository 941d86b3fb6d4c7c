//! Per-task event bus.
//!
//! Every published event gets the next sequence number, is appended to the
//! task's history and is fanned out over a bounded broadcast channel. A new
//! subscriber takes a snapshot of the history and a live receiver under the
//! same lock, so it sees every event exactly once and in order. A receiver
//! that falls more than the buffer behind loses the oldest events and is told
//! how many it missed; publication never waits on a subscriber.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use treemux_core::{DomainEvent, EventEnvelope, TaskId};

/// Item yielded to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum BusItem {
    Event(EventEnvelope),
    /// The subscriber fell behind and `skipped` events were dropped.
    Gap { skipped: u64 },
}

struct BusInner {
    history: Vec<EventEnvelope>,
    next_seq: u64,
    /// `None` once the bus is closed.
    sender: Option<broadcast::Sender<EventEnvelope>>,
}

/// Ordered event stream of one task.
pub struct EventBus {
    task_id: TaskId,
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to `buffer` live events.
    pub fn new(task_id: TaskId, buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            task_id,
            inner: Mutex::new(BusInner {
                history: Vec::new(),
                next_seq: 1,
                sender: Some(sender),
            }),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Publish an event to the history and to every live subscriber.
    ///
    /// Returns `None` if the bus has been closed.
    pub async fn publish(&self, event: DomainEvent) -> Option<EventEnvelope> {
        let mut inner = self.inner.lock().await;
        let Some(sender) = inner.sender.clone() else {
            warn!(task_id = %self.task_id, event = event.event_type(), "Publish on closed event bus");
            return None;
        };

        let envelope = EventEnvelope::new(inner.next_seq, self.task_id.clone(), event);
        inner.next_seq += 1;
        inner.history.push(envelope.clone());

        // Err only means there are no live subscribers right now.
        let receivers = sender.send(envelope.clone()).unwrap_or(0);
        debug!(
            task_id = %self.task_id,
            seq = envelope.seq,
            event = envelope.event.event_type(),
            receivers,
            "Event published"
        );
        Some(envelope)
    }

    /// Subscribe: replay of the full history followed by live events.
    pub async fn subscribe(&self) -> Subscription {
        let inner = self.inner.lock().await;
        let backlog: VecDeque<EventEnvelope> = inner.history.iter().cloned().collect();
        let live = inner.sender.as_ref().map(|s| s.subscribe());
        Subscription { backlog, live }
    }

    /// Copy of every event published so far.
    pub async fn history(&self) -> Vec<EventEnvelope> {
        self.inner.lock().await.history.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .sender
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Stop accepting events. Subscribers drain what they have, then end.
    pub async fn close(&self) {
        self.inner.lock().await.sender = None;
    }
}

/// A subscriber's view of one task's stream.
pub struct Subscription {
    backlog: VecDeque<EventEnvelope>,
    live: Option<broadcast::Receiver<EventEnvelope>>,
}

impl Subscription {
    /// Next item; `None` once the bus is closed and everything is drained.
    pub async fn next(&mut self) -> Option<BusItem> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(BusItem::Event(envelope));
        }
        let live = self.live.as_mut()?;
        match live.recv().await {
            Ok(envelope) => Some(BusItem::Event(envelope)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Subscriber lagged, events dropped");
                Some(BusItem::Gap { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.live = None;
                None
            }
        }
    }

    /// Next item if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<BusItem> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(BusItem::Event(envelope));
        }
        match self.live.as_mut()?.try_recv() {
            Ok(envelope) => Some(BusItem::Event(envelope)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => Some(BusItem::Gap { skipped }),
            Err(_) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = BusItem> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let item = sub.next().await?;
            Some((item, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treemux_core::JobId;

    fn step(index: u32) -> DomainEvent {
        DomainEvent::JobStepReported {
            job_id: JobId::new("j1"),
            index,
            summary: format!("step {index}"),
        }
    }

    fn seq_of(item: Option<BusItem>) -> u64 {
        match item {
            Some(BusItem::Event(e)) => e.seq,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_publish_order() {
        let bus = EventBus::new(TaskId::new("t1"), 16);
        let mut a = bus.subscribe().await;
        let mut b = bus.subscribe().await;

        for i in 0..5 {
            bus.publish(step(i)).await;
        }

        for sub in [&mut a, &mut b] {
            let seqs: Vec<u64> = (0..5).map(|_| seq_of(sub.try_next())).collect();
            assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_history_then_live() {
        let bus = EventBus::new(TaskId::new("t1"), 16);
        bus.publish(step(0)).await;
        bus.publish(step(1)).await;

        let mut late = bus.subscribe().await;
        bus.publish(step(2)).await;

        assert_eq!(seq_of(late.next().await), 1);
        assert_eq!(seq_of(late.next().await), 2);
        assert_eq!(seq_of(late.next().await), 3);
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_gap() {
        let bus = EventBus::new(TaskId::new("t1"), 2);
        let mut slow = bus.subscribe().await;
        for i in 0..5 {
            bus.publish(step(i)).await;
        }

        assert_eq!(slow.next().await, Some(BusItem::Gap { skipped: 3 }));
        assert_eq!(seq_of(slow.next().await), 4);
        assert_eq!(seq_of(slow.next().await), 5);

        // History is unaffected by the slow subscriber.
        assert_eq!(bus.history().await.len(), 5);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let bus = EventBus::new(TaskId::new("t1"), 4);
        let mut sub = bus.subscribe().await;
        bus.publish(step(0)).await;
        bus.close().await;

        assert_eq!(seq_of(sub.next().await), 1);
        assert!(sub.next().await.is_none());
        assert!(bus.publish(step(1)).await.is_none());
    }
}
