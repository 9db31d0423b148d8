//! Bounded FIFO work queue
//!
//! Submission never blocks the coordinator: a full queue is reported as
//! [`LoadError::QueueFull`]. Workers block on the receiving end until a job
//! arrives or the queue is closed.

use smol::channel::{self, Receiver, Sender, TrySendError};

use crate::LoadError;

/// FIFO queue feeding a worker set
pub struct DecodeQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> DecodeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Enqueue a job without waiting
    pub fn submit(&self, job: T) -> Result<(), LoadError> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => LoadError::QueueFull,
            TrySendError::Closed(_) => LoadError::Shutdown,
        })
    }

    /// Receiving end for a worker
    pub fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }

    /// Refuse new jobs. Jobs already queued are still handed out.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for DecodeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = DecodeQueue::new(4);
        queue.submit(1).unwrap();
        queue.submit(2).unwrap();
        queue.submit(3).unwrap();
        let rx = queue.receiver();
        assert_eq!(rx.recv_blocking().unwrap(), 1);
        assert_eq!(rx.recv_blocking().unwrap(), 2);
        assert_eq!(rx.recv_blocking().unwrap(), 3);
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = DecodeQueue::new(2);
        queue.submit("a").unwrap();
        queue.submit("b").unwrap();
        assert!(matches!(queue.submit("c"), Err(LoadError::QueueFull)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let queue = DecodeQueue::new(2);
        queue.submit(7).unwrap();
        assert!(queue.close());
        assert!(!queue.close());
        assert!(matches!(queue.submit(8), Err(LoadError::Shutdown)));

        let rx = queue.receiver();
        assert_eq!(rx.recv_blocking().unwrap(), 7);
        assert!(rx.recv_blocking().is_err());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = DecodeQueue::<u8>::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.submit(1).unwrap();
        assert!(!queue.is_closed());
    }
}
