//! Bounded single-producer/single-consumer hand-off between a reader thread
//! and the tick loop.
//!
//! When the consumer falls behind, the oldest unread message is evicted to make
//! room: freshest wins, nothing blocks. Built on a bounded crossbeam channel;
//! the producer keeps its own receiving handle purely for eviction.

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// What happened to the queue when a message was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Room was available.
    Delivered,
    /// The queue was full and the oldest unread message was discarded.
    Superseded,
}

/// Create a mailbox holding at most `depth` unread messages (minimum 1).
pub fn mailbox<T>(depth: usize) -> (MailboxSender<T>, MailboxReceiver<T>) {
    let depth = depth.max(1);
    let (tx, rx) = crossbeam_channel::bounded(depth);
    (
        MailboxSender {
            tx,
            evict: rx.clone(),
            depth,
        },
        MailboxReceiver { rx },
    )
}

/// Producing half, owned by exactly one channel reader.
pub struct MailboxSender<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
    depth: usize,
}

impl<T> MailboxSender<T> {
    /// Enqueue `msg`, discarding the oldest unread message if the queue is full.
    pub fn push(&self, mut msg: T) -> PushOutcome {
        let mut outcome = PushOutcome::Delivered;
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(m)) => {
                    // The consumer may pop concurrently; then nothing is evicted
                    // and the retry simply finds room.
                    if self.evict.try_recv().is_ok() {
                        outcome = PushOutcome::Superseded;
                    }
                    msg = m;
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Unreachable while `evict` is alive; the message goes nowhere either way.
                    return PushOutcome::Superseded;
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Consuming half, owned by the fusion tick loop.
pub struct MailboxReceiver<T> {
    rx: Receiver<T>,
}

impl<T> MailboxReceiver<T> {
    /// Take the oldest unread message, or `None` if there is no new data.
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
