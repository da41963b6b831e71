//! Ingestion retry queue and dead-letter path.
//!
//! An atom whose embedding call fails stays durable in the store and lands
//! here. The maintenance loop retries due entries with exponential backoff;
//! entries that exhaust their attempts move to the dead-letter list, where
//! they are isolated from the pipeline but fully introspectable. Re-applying
//! an event for content that already made it through is a no-op by
//! construction (dedup by content hash, wholesale embedding replace).

use parking_lot::Mutex;
use sema_vector::AtomId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A deferred embedding attempt.
#[derive(Debug, Clone)]
pub struct PendingEmbed {
    pub atom: AtomId,
    /// Attempts made so far (the inline attempt counts).
    pub attempts: u32,
    pub due_at: Instant,
}

/// An ingestion event that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub atom: AtomId,
    pub attempts: u32,
    pub last_error: String,
}

/// Bounded retry queue plus dead-letter list.
pub struct IngestQueue {
    pending: Mutex<VecDeque<PendingEmbed>>,
    dead: Mutex<Vec<DeadLetter>>,
    depth: usize,
}

impl IngestQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
            depth,
        }
    }

    /// Schedule a retry. Returns false when the queue is full — the caller
    /// must dead-letter the event instead of dropping it silently.
    pub fn schedule(&self, atom: AtomId, attempts: u32, delay: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.len() >= self.depth {
            return false;
        }
        pending.push_back(PendingEmbed {
            atom,
            attempts,
            due_at: Instant::now() + delay,
        });
        true
    }

    /// Pop every entry whose backoff has elapsed.
    pub fn take_due(&self) -> Vec<PendingEmbed> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let mut due = Vec::new();
        let mut keep = VecDeque::with_capacity(pending.len());
        while let Some(entry) = pending.pop_front() {
            if entry.due_at <= now {
                due.push(entry);
            } else {
                keep.push_back(entry);
            }
        }
        *pending = keep;
        due
    }

    /// Park an event permanently.
    pub fn dead_letter(&self, atom: AtomId, attempts: u32, last_error: String) {
        tracing::warn!(%atom, attempts, %last_error, "ingestion event dead-lettered");
        self.dead.lock().push(DeadLetter {
            atom,
            attempts,
            last_error,
        });
    }

    /// Snapshot of the dead-letter list.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().clone()
    }

    /// Entries awaiting retry.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
