//! Admission queue: priority ordering, session dedup and bounded capacity.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::message::{Message, Priority, Sequencer};

/// Result of admitting a message.
#[derive(Debug)]
pub enum Admission {
    /// New resident; carries the resident evicted to make room, if any.
    Enqueued { sequence: u64, evicted: Option<Message> },
    /// A resident with the same session was replaced within the dedup window.
    Updated { sequence: u64 },
}

impl Admission {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Enqueued { sequence, .. } | Self::Updated { sequence } => *sequence,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

pub struct AdmissionQueue {
    residents: Mutex<Vec<Message>>,
    max_size: usize,
    dedup_window: Duration,
    sequencer: Sequencer,
    available: Notify,
}

impl AdmissionQueue {
    pub fn new(max_size: usize, dedup_window: Duration, sequencer: Sequencer) -> Self {
        Self {
            residents: Mutex::new(Vec::new()),
            max_size: max_size.max(1),
            dedup_window,
            sequencer,
            available: Notify::new(),
        }
    }

    pub fn enqueue(&self, msg: Message) -> Admission {
        self.enqueue_at(msg, Instant::now())
    }

    /// Admit `msg` as of `now`.
    pub fn enqueue_at(&self, mut msg: Message, now: Instant) -> Admission {
        msg.admitted = now;
        let mut residents = self.residents.lock();

        let duplicate = residents.iter().position(|r| {
            r.session_id == msg.session_id && now.saturating_duration_since(r.admitted) < self.dedup_window
        });
        if let Some(idx) = duplicate {
            msg.sequence = residents[idx].sequence;
            debug!("Queue update: session {} (#{})", msg.session_id, msg.sequence);
            residents[idx] = msg;
            return Admission::Updated {
                sequence: residents[idx].sequence,
            };
        }

        let evicted = if residents.len() >= self.max_size {
            let victim = oldest_where(&residents, |r| r.priority == Priority::Low)
                .or_else(|| oldest_where(&residents, |_| true));
            victim.map(|idx| residents.remove(idx))
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            info!(
                "Queue full ({}): evicted #{} [{:?}] from {}",
                self.max_size, evicted.sequence, evicted.priority, evicted.source
            );
        }

        msg.sequence = self.sequencer.next();
        let sequence = msg.sequence;
        debug!("Queue enqueue: #{sequence} [{:?}] session {}", msg.priority, msg.session_id);
        residents.push(msg);
        drop(residents);

        self.available.notify_one();
        Admission::Enqueued { sequence, evicted }
    }

    /// Remove and return the next message, or `None` when empty.
    pub fn dequeue(&self) -> Option<Message> {
        let mut residents = self.residents.lock();
        let idx = residents
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| (r.priority.rank(), r.sequence))
            .map(|(idx, _)| idx)?;
        let msg = residents.remove(idx);
        debug!("Queue dequeue: #{} [{:?}]", msg.sequence, msg.priority);
        Some(msg)
    }

    /// Wait until a message is resident, then dequeue it.
    pub async fn next(&self) -> Message {
        loop {
            let notified = self.available.notified();
            if let Some(msg) = self.dequeue() {
                return msg;
            }
            notified.await;
        }
    }

    /// Priority-then-FIFO snapshot of residents.
    pub fn pending(&self) -> Vec<Message> {
        let mut snapshot = self.residents.lock().clone();
        snapshot.sort_by_key(|r| (r.priority.rank(), r.sequence));
        snapshot
    }

    pub fn remove(&self, sequence: u64) -> Option<Message> {
        let mut residents = self.residents.lock();
        let idx = residents.iter().position(|r| r.sequence == sequence)?;
        Some(residents.remove(idx))
    }

    /// Drop every resident, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut residents = self.residents.lock();
        let removed = residents.len();
        residents.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.residents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

fn oldest_where(residents: &[Message], pred: impl Fn(&Message) -> bool) -> Option<usize> {
    residents
        .iter()
        .enumerate()
        .filter(|(_, r)| pred(r))
        .min_by_key(|(_, r)| r.sequence)
        .map(|(idx, _)| idx)
}
