//! Blocking event queue shared by an engine and its consumers.

use std::sync::{PoisonError, RwLock};

use crossbeam_channel as channel;
use tracing::trace;

use crate::error::{MonitorError, Result};
use crate::event::FileMonitorEvent;

type Item = Result<FileMonitorEvent>;

/// FIFO of engine results.
///
/// Backed by a multi-consumer channel, so every queued item is handed to
/// exactly one consumer, in push order. Closing drops the only sender: pending
/// and future pops fail with [`MonitorError::Cancelled`] and pushes are
/// discarded.
pub struct EventQueue {
    /// `None` once closed.
    sender: RwLock<Option<channel::Sender<Item>>>,
    receiver: channel::Receiver<Item>,
}

impl EventQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
        }
    }

    /// Queue an event.
    pub fn push(&self, event: FileMonitorEvent) {
        self.push_result(Ok(event));
    }

    /// Queue a backend failure for the next consumer.
    pub fn push_error(&self, error: MonitorError) {
        self.push_result(Err(error));
    }

    fn push_result(&self, item: Item) {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                // The receiver lives as long as `self`, so this cannot fail.
                let _ = sender.send(item);
            }
            None => trace!("discarding item pushed to closed queue"),
        }
    }

    /// Remove the oldest item, blocking until one is available or the queue
    /// is closed.
    pub fn pop(&self) -> Result<FileMonitorEvent> {
        self.receiver.recv().unwrap_or(Err(MonitorError::Cancelled))
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning `None`.
    #[cfg(test)]
    pub(crate) fn pop_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Option<Result<FileMonitorEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(channel::RecvTimeoutError::Timeout) => None,
            Err(channel::RecvTimeoutError::Disconnected) => Some(Err(MonitorError::Cancelled)),
        }
    }

    /// Close the queue and wake every blocked consumer. Idempotent.
    pub fn close(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let discarded = self.receiver.try_iter().count();
        if discarded > 0 {
            trace!("discarded {discarded} queued items on close");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no item is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeKind, WatchId};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn event(name: &str) -> FileMonitorEvent {
        FileMonitorEvent::new(WatchId::new(1), ChangeKind::Added, name)
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.push(event("a"));
        queue.push(event("b"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().path.to_str(), Some("a"));
        assert_eq!(queue.pop().unwrap().path.to_str(), Some("b"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_error_passthrough() {
        let queue = EventQueue::new();
        queue.push_error(MonitorError::Config("boom".to_string()));

        assert!(matches!(queue.pop(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let queue = Arc::new(EventQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.close();

        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(MonitorError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_closed_queue_discards_pushes() {
        let queue = EventQueue::new();
        queue.push(event("a"));
        queue.close();
        queue.close();
        queue.push(event("b"));

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert!(matches!(queue.pop(), Err(MonitorError::Cancelled)));
    }

    #[test]
    fn test_pop_timeout() {
        let queue = EventQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());

        queue.push(event("a"));
        let item = queue.pop_timeout(Duration::from_millis(10));
        assert!(matches!(item, Some(Ok(_))));
    }
}
