use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A bounded FIFO queue shared between one producer tier and its pullers.
///
/// Every pushed item is delivered to exactly one puller. Cloning yields another
/// handle onto the same queue.
pub struct WorkQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            depth: Arc::clone(&self.depth),
            capacity: self.capacity,
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Push without waiting. A full queue rejects the item.
    pub fn push(&self, item: T) -> RelayResult<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => RelayError::Queue(format!(
                        "queue full (capacity {})",
                        self.capacity
                    )),
                    mpsc::error::TrySendError::Closed(_) => {
                        RelayError::Queue("queue closed".to_string())
                    }
                })
            }
        }
    }

    /// Wait as long as it takes for the next item.
    pub async fn pull(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Wait at most `wait` for the next item.
    pub async fn pull_timeout(&self, wait: Duration) -> Option<T> {
        tokio::time::timeout(wait, self.pull()).await.ok().flatten()
    }

    /// Take the next item only if one is immediately available.
    pub fn try_pull(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        let item = rx.try_recv().ok();
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether no item is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(4);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pull().await, Some(0));
        assert_eq!(queue.pull().await, Some(1));
        assert_eq!(queue.try_pull(), Some(2));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_rejects_when_full() {
        let queue = WorkQueue::new(2);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        let err = queue.push("c").unwrap_err();
        assert!(matches!(err, RelayError::Queue(_)));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_pull_timeout_on_empty() {
        let queue: WorkQueue<u32> = WorkQueue::new(1);
        let got = queue.pull_timeout(Duration::from_millis(20)).await;
        assert_eq!(got, None);
        assert!(queue.try_pull().is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let queue = WorkQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(()).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_pullers_see_each_item_once() {
        let queue = WorkQueue::new(200);
        for i in 0..200u32 {
            queue.push(i).unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = q.pull_timeout(Duration::from_millis(50)).await {
                    seen.push(item);
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let distinct: HashSet<u32> = all.iter().copied().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(distinct.len(), 200);
        assert!(queue.is_empty());
    }
}
