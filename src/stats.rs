//! Throughput and error counters
//!
//! The counters live inside the shared ring header, so a snapshot taken from
//! any handle (producer or consumer process) sees the same numbers. Each field
//! is read atomically, but a snapshot is not a transaction across fields.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters stored in shared memory
#[repr(C)]
pub struct StatsBlock {
    messages_written: AtomicU64,
    bytes_written: AtomicU64,
    messages_read: AtomicU64,
    bytes_read: AtomicU64,
    write_errors: AtomicU64,
    read_errors: AtomicU64,
    backpressure_events: AtomicU64,
    full_events: AtomicU64,
    write_retries: AtomicU64,
}

impl StatsBlock {
    pub const fn new() -> Self {
        Self {
            messages_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            messages_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
            full_events: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_write(&self, bytes: usize) {
        self.messages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read(&self, bytes: usize) {
        self.messages_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    /// A `Full` rejection is also a write error
    #[inline]
    pub fn record_full(&self) {
        self.full_events.fetch_add(1, Ordering::Relaxed);
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RingStats {
        RingStats {
            messages_written: self.messages_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            messages_read: self.messages_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            full_events: self.full_events.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.messages_written,
            &self.bytes_written,
            &self.messages_read,
            &self.bytes_read,
            &self.write_errors,
            &self.read_errors,
            &self.backpressure_events,
            &self.full_events,
            &self.write_retries,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for StatsBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the ring counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RingStats {
    pub messages_written: u64,
    /// Payload bytes, headers and padding excluded
    pub bytes_written: u64,
    pub messages_read: u64,
    pub bytes_read: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub backpressure_events: u64,
    pub full_events: u64,
    /// Failed reservation attempts under writer contention
    pub write_retries: u64,
}

impl RingStats {
    /// Messages published but not yet consumed
    pub fn in_flight(&self) -> u64 {
        self.messages_written.saturating_sub(self.messages_read)
    }
}
