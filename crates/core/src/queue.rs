use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

/// Names of the consumer-pollable queues a session exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    ReceivedMessages,
    PresenceUpdates,
    NewSubscriptions,
    SubscriptionRequests,
    IqStanzas,
    ReceivedEvents,
    PendingMessages,
}

impl QueueName {
    pub const ALL: [QueueName; 7] = [
        QueueName::ReceivedMessages,
        QueueName::PresenceUpdates,
        QueueName::NewSubscriptions,
        QueueName::SubscriptionRequests,
        QueueName::IqStanzas,
        QueueName::ReceivedEvents,
        QueueName::PendingMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::ReceivedMessages => "received_messages",
            QueueName::PresenceUpdates => "presence_updates",
            QueueName::NewSubscriptions => "new_subscriptions",
            QueueName::SubscriptionRequests => "subscription_requests",
            QueueName::IqStanzas => "iq_stanzas",
            QueueName::ReceivedEvents => "received_events",
            QueueName::PendingMessages => "pending_messages",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unbounded FIFO shared between protocol callbacks, application tasks and
/// the delivery worker.
///
/// Producers never block. Consumers either drain without blocking or await
/// the next item with [`EventQueue::pop`].
#[derive(Debug)]
pub struct EventQueue<T> {
    name: QueueName,
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> EventQueue<T> {
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        let len = {
            let mut items = self.items();
            items.push_back(item);
            items.len()
        };
        trace!(queue = %self.name, len, "Item queued");
        self.available.notify_one();
    }

    /// Remove and return up to `max` items in arrival order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut items = self.items();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Remove up to `max` items, handing each to `f` as it leaves the queue.
    ///
    /// Returning `ControlFlow::Break` stops draining after the current item;
    /// the rest stay queued. Returns the number of items handed out.
    pub fn drain_with<F>(&self, max: usize, mut f: F) -> usize
    where
        F: FnMut(T) -> ControlFlow<()>,
    {
        let mut handed = 0;
        while handed < max {
            // The lock is released before calling out so `f` may push back.
            let Some(item) = self.items().pop_front() else {
                break;
            };
            handed += 1;
            if f(item).is_break() {
                break;
            }
        }
        handed
    }

    /// Wait until an item is available and remove it.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.items().pop_front() {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn drain_respects_max_and_order() {
        let queue = EventQueue::new(QueueName::ReceivedMessages);
        for i in 0..5 {
            queue.push(i);
        }

        assert_eq!(queue.drain(3), vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(100), vec![3, 4]);
        assert!(queue.is_empty());
        assert!(queue.drain(10).is_empty());
    }

    #[test]
    fn drain_with_stops_on_break() {
        let queue = EventQueue::new(QueueName::IqStanzas);
        for i in 0..4 {
            queue.push(i);
        }

        let mut seen = Vec::new();
        let handed = queue.drain_with(10, |item| {
            seen.push(item);
            if item == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(handed, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(queue.drain(10), vec![2, 3]);
    }

    #[test]
    fn drain_with_allows_requeue_from_callback() {
        let queue = EventQueue::new(QueueName::PendingMessages);
        queue.push("a");
        queue.push("b");

        let handed = queue.drain_with(2, |item| {
            queue.push(item);
            ControlFlow::Continue(())
        });

        assert_eq!(handed, 2);
        assert_eq!(queue.drain(10), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn pop_waits_for_push() {
        let queue = Arc::new(EventQueue::new(QueueName::PendingMessages));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!consumer.is_finished());

        queue.push(42);
        assert_eq!(consumer.await.unwrap(), 42);
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            QueueName::ALL.iter().map(QueueName::as_str).collect();
        assert_eq!(names.len(), QueueName::ALL.len());
        assert_eq!(QueueName::IqStanzas.to_string(), "iq_stanzas");
    }
}
