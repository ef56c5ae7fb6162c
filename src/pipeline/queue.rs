//! Bounded multi-consumer queue with end-of-stream sentinels
//!
//! Producers `put` items; any number of consumers `get` them, each item being
//! delivered to exactly one consumer. Consumers acknowledge every processed
//! item with `task_done`, which lets the owner `join` the queue (wait until
//! everything enqueued so far is processed) before it signals end-of-stream
//! with one [`Envelope::End`] per consumer.

use crate::HarvestError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// A queued value or the end-of-stream sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Item(T),
    End,
}

/// Count of enqueued items not yet acknowledged
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    notify: Notify,
}

impl Pending {
    fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match previous {
            Ok(1) => self.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("task_done called more times than items were queued"),
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Bounded FIFO channel shared by cloning
pub struct WorkQueue<T> {
    tx: mpsc::Sender<Envelope<T>>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
    pending: Arc<Pending>,
    capacity: usize,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            pending: Arc::clone(&self.pending),
            capacity: self.capacity,
        }
    }
}

impl<T: Send> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` envelopes
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(Pending::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an item, waiting while the queue is full
    pub async fn put(&self, item: T) -> Result<(), HarvestError> {
        self.pending.increment();

        if self.tx.send(Envelope::Item(item)).await.is_err() {
            self.pending.decrement();
            return Err(HarvestError::QueueClosed("work queue receiver dropped"));
        }

        Ok(())
    }

    /// Waits for the next envelope
    ///
    /// A closed channel reads as [`Envelope::End`].
    pub async fn get(&self) -> Envelope<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.unwrap_or(Envelope::End)
    }

    /// Blocking variant of [`get`](Self::get) for dedicated threads
    ///
    /// Must not be called from within an async context.
    pub fn get_blocking(&self) -> Envelope<T> {
        let mut rx = self.rx.blocking_lock();
        rx.blocking_recv().unwrap_or(Envelope::End)
    }

    /// Takes an envelope if one is immediately available
    pub fn try_get(&self) -> Option<Envelope<T>> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Acknowledges one item returned by `get`
    pub fn task_done(&self) {
        self.pending.decrement();
    }

    /// Number of items enqueued but not yet acknowledged
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Waits until every enqueued item has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.pending.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.get() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Pushes one end-of-stream sentinel per consumer
    pub async fn close(&self, consumers: usize) -> Result<(), HarvestError> {
        for _ in 0..consumers {
            self.tx
                .send(Envelope::End)
                .await
                .map_err(|_| HarvestError::QueueClosed("work queue receiver dropped"))?;
        }
        Ok(())
    }
}
