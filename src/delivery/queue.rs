//! The delivery queue between producers and the worker.
//!
//! Enqueueing never blocks and never waits on I/O: it is a single send on an
//! unbounded channel. Closing the queue pushes a final [`Command::Drain`]
//! and drops the only sender, so the worker sees everything enqueued before
//! the close and then [`Dequeued::DrainComplete`] once the queue is empty.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{ReportError, ReportResult};
use crate::record::Record;

/// Work item for the delivery worker.
#[derive(Debug)]
pub enum Command {
    /// Route and deliver a record.
    Deliver(Record),
    /// Sync buffered log text now.
    Flush,
    /// Make the task the default destination again.
    ResetDefault,
    /// End of test: finish the queue and stop.
    Drain,
}

/// What the worker got from [`QueueReceiver::dequeue`].
#[derive(Debug)]
pub enum Dequeued {
    Command(Command),
    /// The queue was closed and everything in it has been handed out.
    DrainComplete,
}

/// Producer side of the delivery queue.
pub struct DeliveryQueue {
    sender: Mutex<Option<UnboundedSender<Command>>>,
}

/// Consumer side of the delivery queue, owned by the worker.
pub struct QueueReceiver {
    receiver: UnboundedReceiver<Command>,
}

/// Creates a connected queue pair.
pub fn delivery_queue() -> (DeliveryQueue, QueueReceiver) {
    let (sender, receiver) = unbounded_channel();
    (
        DeliveryQueue {
            sender: Mutex::new(Some(sender)),
        },
        QueueReceiver { receiver },
    )
}

impl DeliveryQueue {
    fn sender(&self) -> MutexGuard<'_, Option<UnboundedSender<Command>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a command to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Shutdown`] if the queue was closed or the
    /// worker is gone.
    pub fn enqueue(&self, command: Command) -> ReportResult<()> {
        match self.sender().as_ref() {
            Some(sender) => sender
                .send(command)
                .map_err(|_| ReportError::Shutdown("delivery worker is no longer running".to_string())),
            None => Err(ReportError::Shutdown(
                "the reporting session already ended".to_string(),
            )),
        }
    }

    /// Pushes [`Command::Drain`] and closes the queue.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        match self.sender().take() {
            Some(sender) => {
                // The worker may already be gone; closing still succeeds.
                let _ = sender.send(Command::Drain);
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }
}

impl QueueReceiver {
    /// Waits for the next command.
    pub async fn dequeue(&mut self) -> Dequeued {
        match self.receiver.recv().await {
            Some(command) => Dequeued::Command(command),
            None => Dequeued::DrainComplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Flags, Level};

    fn record(seq: u64) -> Record {
        Record::log(seq, Level::Info, format!("msg {}", seq), Flags::new()).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_then_drain_complete() {
        let (queue, mut receiver) = delivery_queue();
        for seq in 0..3 {
            queue.enqueue(Command::Deliver(record(seq))).unwrap();
        }
        assert!(queue.close());

        for expected in 0..3 {
            match receiver.dequeue().await {
                Dequeued::Command(Command::Deliver(r)) => assert_eq!(r.seq(), expected),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(
            receiver.dequeue().await,
            Dequeued::Command(Command::Drain)
        ));
        assert!(matches!(receiver.dequeue().await, Dequeued::DrainComplete));
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let (queue, _receiver) = delivery_queue();
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());

        let err = queue.enqueue(Command::Flush).unwrap_err();
        assert!(matches!(err, ReportError::Shutdown(_)));
    }

    #[test]
    fn test_enqueue_without_worker_fails() {
        let (queue, receiver) = delivery_queue();
        drop(receiver);
        let err = queue.enqueue(Command::Flush).unwrap_err();
        assert!(matches!(err, ReportError::Shutdown(_)));
    }
}
