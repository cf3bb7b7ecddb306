use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::metrics;
use crate::model::{PendingRequest, TurnHandle};

/// FIFO hand-off from many callers to the single session driver.
///
/// Unbounded and lossless: a request waits as long as its caller is willing to.
#[derive(Debug, Default)]
pub struct RequestBroker {
    queue: Mutex<VecDeque<PendingRequest>>,
    ready: Notify,
    seq: AtomicU64,
}

impl RequestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, prompt: impl Into<String>) -> TurnHandle {
        let (tx, rx) = oneshot::channel();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let request = PendingRequest::new(seq, prompt.into(), tx);
        let id = request.id;
        let depth = {
            let mut queue = self.queue.lock();
            queue.push_back(request);
            queue.len()
        };
        metrics::record_enqueued(depth);
        self.ready.notify_one();
        TurnHandle {
            id,
            seq,
            completion: rx,
        }
    }

    pub fn dequeue_next(&self) -> Option<PendingRequest> {
        self.queue.lock().pop_front()
    }

    /// Waits until a request is available. Only the session driver calls this.
    pub async fn next(&self) -> PendingRequest {
        loop {
            if let Some(request) = self.dequeue_next() {
                return request;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drops every waiting request; their callers observe a closed signal.
    pub fn drain(&self) -> usize {
        let mut queue = self.queue.lock();
        let drained = queue.len();
        queue.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn preserves_arrival_order() {
        let broker = RequestBroker::new();
        let first = broker.enqueue("first");
        let second = broker.enqueue("second");
        let third = broker.enqueue("third");

        let order: Vec<_> = std::iter::from_fn(|| broker.dequeue_next())
            .map(|req| (req.id, req.prompt))
            .collect();

        assert_eq!(
            order,
            vec![
                (first.id, "first".to_string()),
                (second.id, "second".to_string()),
                (third.id, "third".to_string()),
            ]
        );
        assert!(broker.is_empty());
    }

    #[test]
    fn ids_are_unique_and_sequence_monotonic() {
        let broker = RequestBroker::new();
        let handles: Vec<_> = (0..64).map(|i| broker.enqueue(format!("p{i}"))).collect();

        let ids: HashSet<_> = handles.iter().map(|h| h.id).collect();
        assert_eq!(ids.len(), handles.len());
        assert!(handles.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    }

    #[tokio::test]
    async fn next_wakes_when_request_arrives() {
        let broker = std::sync::Arc::new(RequestBroker::new());
        let waiter = {
            let broker = std::sync::Arc::clone(&broker);
            tokio::spawn(async move { broker.next().await.prompt })
        };
        tokio::task::yield_now().await;
        broker.enqueue("late");
        assert_eq!(waiter.await.unwrap(), "late");
    }

    #[tokio::test]
    async fn drained_requests_close_their_signal() {
        let broker = RequestBroker::new();
        let handle = broker.enqueue("dropped");
        assert_eq!(broker.drain(), 1);
        assert!(handle.completion.await.is_err());
    }
}
