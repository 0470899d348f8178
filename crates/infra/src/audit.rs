//! Audit sinks.
//!
//! - [`BufferedAuditSink`]: bounded channel; a full buffer drops the record
//!   with a warning instead of blocking the decision path.
//! - [`TracingAuditSink`]: one structured `tracing` event per record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use projectgate_auth::{AuditRecord, AuditSink};

pub struct BufferedAuditSink {
    sender: SyncSender<AuditRecord>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Consumer end of a [`BufferedAuditSink`].
#[derive(Debug)]
pub struct AuditReceiver {
    receiver: Receiver<AuditRecord>,
}

impl BufferedAuditSink {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> (Self, AuditReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (
            Self {
                sender,
                capacity,
                dropped: AtomicU64::new(0),
            },
            AuditReceiver { receiver },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped because the buffer was full or the receiver was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for BufferedAuditSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferedAuditSink")
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl AuditSink for BufferedAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    audit_id = %record.id,
                    capacity = self.capacity,
                    dropped,
                    "audit buffer full; record dropped"
                );
            }
            Err(TrySendError::Disconnected(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(audit_id = %record.id, "audit receiver gone; record dropped");
            }
        }
    }
}

impl AuditReceiver {
    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<AuditRecord> {
        self.receiver.try_iter().collect()
    }

    pub fn try_recv(&self) -> Result<AuditRecord, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<AuditRecord, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Emits each record as an `info` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            audit_id = %record.id,
            user_id = %record.user_id,
            superuser = record.superuser,
            action = %record.action,
            resource_type = %record.resource_type,
            resource_id = ?record.resource_id,
            allowed = record.allowed,
            reason = %record.reason,
            matched_rule = ?record.matched_rule.map(|r| r.to_string()),
            error_kind = ?record.error_kind,
            "access decision"
        );
    }
}
