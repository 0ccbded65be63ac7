//! Result queue shared by background download workers.
//!
//! Many producers push finished results; the orchestrator drains the queue
//! once every worker has been joined. Capacity is sized to the number of
//! items that can produce a result, so producers never wait on a consumer
//! that only drains at the end.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

/// FIFO with concurrent producers and a single draining consumer
pub struct ResultQueue<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
}

/// Cloneable producer side handed to each worker
pub struct ResultProducer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for ResultProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> ResultProducer<T> {
    /// Push a result, waiting only if the queue is full
    pub async fn put(&self, item: T) -> Result<(), SendError<T>> {
        self.tx.send(item).await
    }
}

impl<T: Send> ResultQueue<T> {
    /// Create a queue holding up to `capacity` undrained results (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    /// A producer handle for a worker
    pub fn producer(&self) -> ResultProducer<T> {
        ResultProducer {
            tx: self.tx.clone(),
        }
    }

    /// Push a result from the owning task
    pub async fn put(&self, item: T) -> Result<(), SendError<T>> {
        self.tx.send(item).await
    }

    /// Number of undrained results.
    ///
    /// May be stale by the time the caller looks at it; fine for logging and
    /// backpressure heuristics, not for accounting.
    pub fn approximate_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Take everything currently queued, in arrival order
    pub fn drain_to_list(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.approximate_size());
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }
}
