//! Lock-free ring buffer of framed messages
//!
//! # Protocol
//!
//! Writers (any number, any thread or process):
//! 1. Reserve `frame_size(len)` bytes by compare-and-swap on `write_frontier`
//! 2. Copy header + payload into the reservation, wrapping at the end of the data region
//! 3. Publish by moving `commit_frontier` from the reservation start to its end.
//!    Commits therefore land in reservation order.
//!
//! The single consumer reads frames between `read_frontier` and
//! `commit_frontier` and moves `read_frontier` forward once the caller is done
//! with the payload.
//!
//! All frontiers are offsets in `[0, capacity)`. One byte of capacity is
//! never handed out so that equal frontiers always mean "empty".

use crate::checksum::checksum;
use crate::config::RingConfig;
use crate::error::{Corruption, Result, RingError};
use crate::layout::{
    frame_size, MessageHeader, RingHeader, DATA_OFFSET, MESSAGE_ALIGN, MESSAGE_HEADER_SIZE,
    MESSAGE_MAGIC, RING_MAGIC, RING_VERSION,
};
use crate::reader::Consumer;
use crate::shm::{Region, RegionKind};
use crate::stats::RingStats;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};
use std::thread;

/// Failed commit attempts before a waiting writer gives up its timeslice
const COMMIT_SPIN_LIMIT: u32 = 64;

/// A frame located by the reader, not yet released
pub(crate) struct Frame {
    pub header: MessageHeader,
    /// Start of the payload, either inside the data region or inside the
    /// caller's scratch buffer
    pub payload: *const u8,
    pub len: usize,
    pub zero_copy: bool,
    /// Read frontier once this frame is consumed
    pub next: u64,
}

/// Handle to a ring living in an anonymous, heap or shared memory region
pub struct RingBuffer {
    region: Region,
    header: NonNull<RingHeader>,
    data: NonNull<u8>,
    capacity: u64,
    mask: u64,
    threshold: f64,
    max_message_size: u64,
    /// Largest payload whose frame fits in `capacity - 1` bytes, capped at
    /// `max_message_size`
    max_payload: u64,
}

// SAFETY: all mutable ring state is behind atomics in the header; the data
// region is only written inside reservations owned by a single writer
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create an in-process ring with default settings and the requested
    /// capacity (0 selects the default, anything else rounds up to a power of two)
    pub fn create(capacity: usize) -> Result<Self> {
        Self::with_config(&RingConfig::new(capacity))
    }

    /// Create an in-process ring
    pub fn with_config(config: &RingConfig) -> Result<Self> {
        let capacity = config.validate()?;
        let size = region_size(capacity)?;
        let region = Region::allocate(size, config.backing)?;
        Ok(Self::init(region, capacity, config))
    }

    /// Create a ring in named shared memory; other processes attach with
    /// [`RingBuffer::open_shared`]. The name is unlinked when this handle drops.
    pub fn create_shared(name: &str, config: &RingConfig) -> Result<Self> {
        let capacity = config.validate()?;
        let size = region_size(capacity)?;
        let region = Region::create_shared(name, size)?;
        Ok(Self::init(region, capacity, config))
    }

    /// Attach to a ring created by another process
    pub fn open_shared(name: &str) -> Result<Self> {
        let region = Region::open_shared(name)?;
        if region.size() <= DATA_OFFSET {
            return Err(Corruption::Capacity {
                expected: 0,
                got: region.size() as u64,
            }
            .into());
        }

        let header = region.as_ptr().cast::<RingHeader>();
        // SAFETY: the region is at least DATA_OFFSET bytes and page aligned
        let magic = unsafe { ptr::addr_of!((*header).magic).read_volatile() };
        fence(Ordering::Acquire);
        let (version, capacity, threshold_bits, max_message_size) = unsafe {
            (
                ptr::addr_of!((*header).version).read_volatile(),
                ptr::addr_of!((*header).capacity).read_volatile(),
                ptr::addr_of!((*header).threshold_bits).read_volatile(),
                ptr::addr_of!((*header).max_message_size).read_volatile(),
            )
        };

        if magic != RING_MAGIC {
            return Err(Corruption::RingMagic {
                expected: RING_MAGIC,
                got: magic,
            }
            .into());
        }
        if version != RING_VERSION {
            return Err(Corruption::RingVersion {
                expected: RING_VERSION,
                got: version,
            }
            .into());
        }
        let mapped = (region.size() - DATA_OFFSET) as u64;
        if !capacity.is_power_of_two() || capacity != mapped {
            return Err(Corruption::Capacity {
                expected: mapped,
                got: capacity,
            }
            .into());
        }

        let ring = Self::from_parts(region, capacity, f64::from_bits(threshold_bits), max_message_size);
        tracing::debug!(
            name,
            capacity,
            threshold = ring.threshold,
            "attached to shared ring buffer"
        );
        Ok(ring)
    }

    fn init(region: Region, capacity: usize, config: &RingConfig) -> Self {
        let header = region.as_ptr().cast::<RingHeader>();
        let mut initial = RingHeader::new(
            capacity as u64,
            config.backpressure_threshold,
            config.max_message_size as u64,
        );
        initial.magic = 0;

        // Magic goes in last so an attaching process never sees a half-built header
        unsafe {
            ptr::write(header, initial);
            fence(Ordering::Release);
            ptr::addr_of_mut!((*header).magic).write_volatile(RING_MAGIC);
        }

        let ring = Self::from_parts(
            region,
            capacity as u64,
            config.backpressure_threshold,
            config.max_message_size as u64,
        );
        tracing::debug!(
            capacity,
            backing = %ring.backing(),
            threshold = ring.threshold,
            max_message_size = ring.max_message_size,
            "ring buffer created"
        );
        ring
    }

    fn from_parts(region: Region, capacity: u64, threshold: f64, max_message_size: u64) -> Self {
        let base = region.as_ptr();
        // SAFETY: Region pointers are never null and the region spans DATA_OFFSET + capacity
        let header = unsafe { NonNull::new_unchecked(base.cast::<RingHeader>()) };
        let data = unsafe { NonNull::new_unchecked(base.add(DATA_OFFSET)) };
        Self {
            region,
            header,
            data,
            capacity,
            mask: capacity - 1,
            threshold,
            max_message_size,
            max_payload: largest_payload(capacity).min(max_message_size),
        }
    }

    /// Tear the ring down, releasing the backing region
    pub fn destroy(self) {
        drop(self);
    }

    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: the header lives as long as the region owned by self
        unsafe { self.header.as_ref() }
    }

    /// Size of the data region in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size as usize
    }

    /// Largest payload `write` will accept on this ring: the configured
    /// maximum, or less when a frame that size could never fit
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.max_payload as usize
    }

    /// How the backing region was obtained
    pub fn backing(&self) -> RegionKind {
        self.region.kind()
    }

    /// Shared memory name, for rings created with `create_shared`/`open_shared`
    pub fn name(&self) -> Option<&str> {
        self.region.name()
    }

    /// Structural integrity check: magic, power-of-two capacity matching the
    /// mapping, and every frontier inside `[0, capacity)`. The backing pointer
    /// is non-null by construction.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    pub(crate) fn check(&self) -> std::result::Result<(), Corruption> {
        let hdr = self.header.as_ptr();
        let (magic, capacity) = unsafe {
            (
                ptr::addr_of!((*hdr).magic).read_volatile(),
                ptr::addr_of!((*hdr).capacity).read_volatile(),
            )
        };
        if magic != RING_MAGIC {
            return Err(Corruption::RingMagic {
                expected: RING_MAGIC,
                got: magic,
            });
        }
        if !capacity.is_power_of_two() || capacity != self.capacity {
            return Err(Corruption::Capacity {
                expected: self.capacity,
                got: capacity,
            });
        }

        let header = self.header();
        for (frontier, value) in [
            ("write", header.write_frontier.0.load(Ordering::Acquire)),
            ("commit", header.commit_frontier.0.load(Ordering::Acquire)),
            ("read", header.read_frontier.0.load(Ordering::Acquire)),
        ] {
            if value >= self.capacity {
                return Err(Corruption::FrontierOutOfRange {
                    frontier,
                    value,
                    capacity: self.capacity,
                });
            }
        }
        Ok(())
    }

    #[inline(always)]
    fn occupied(&self, write: u64, read: u64) -> u64 {
        write.wrapping_sub(read) & self.mask
    }

    /// Fraction of the data region reserved but not yet consumed, in `[0, 1)`
    #[inline]
    pub fn utilization(&self) -> f64 {
        let header = self.header();
        let write = header.write_frontier.0.load(Ordering::Acquire);
        let read = header.read_frontier.0.load(Ordering::Acquire);
        self.occupied(write, read) as f64 / self.capacity as f64
    }

    /// Whether the last admission check refused a write
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.header().flags.0.backpressure_active.load(Ordering::Relaxed)
    }

    /// Whether the last reservation failed for lack of raw space
    #[inline]
    pub fn is_full(&self) -> bool {
        self.header().flags.0.is_full.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RingStats {
        self.header().stats.0.snapshot()
    }

    pub fn reset_stats(&self) {
        self.header().stats.0.reset();
    }

    /// Claim the read side of the ring
    ///
    /// Only one consumer may exist at a time across every handle on the ring;
    /// a second claim fails with `ConsumerAttached` until the first is dropped.
    pub fn consumer(&self) -> Result<Consumer<'_>> {
        if !self.try_attach_consumer() {
            return Err(RingError::ConsumerAttached);
        }
        Ok(Consumer::new(self))
    }

    pub(crate) fn try_attach_consumer(&self) -> bool {
        self.header()
            .flags
            .0
            .consumer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn detach_consumer(&self) {
        self.header()
            .flags
            .0
            .consumer_attached
            .store(false, Ordering::Release);
    }

    /// Append one framed message
    ///
    /// Never blocks on the reader: a refused write returns `Backpressure` (soft
    /// admission limit) or `Full` (no raw space) and the caller decides
    /// whether to retry, back off or drop. The only wait is for earlier
    /// reservations to publish before this one can.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let header = self.header();
        let stats = &header.stats.0;

        if data.is_empty() {
            stats.record_write_error();
            return Err(RingError::InvalidParam("payload must not be empty"));
        }
        if let Err(corruption) = self.check() {
            stats.record_write_error();
            tracing::warn!(%corruption, "refusing write to corrupted ring");
            return Err(corruption.into());
        }
        if data.len() as u64 > self.max_payload {
            stats.record_write_error();
            return Err(RingError::TooLarge {
                max: self.max_payload as usize,
                got: data.len(),
            });
        }

        // Admission control runs before the raw space check
        let utilization = self.utilization();
        if utilization >= self.threshold {
            header.flags.0.backpressure_active.store(true, Ordering::Relaxed);
            stats.record_backpressure();
            tracing::trace!(utilization, threshold = self.threshold, "write refused by backpressure");
            return Err(RingError::Backpressure {
                utilization,
                threshold: self.threshold,
            });
        }
        header.flags.0.backpressure_active.store(false, Ordering::Relaxed);

        let total = frame_size(data.len()) as u64;
        let start = self.reserve(total)?;
        let end = (start + total) & self.mask;

        let message = MessageHeader::new(data.len() as u32, monotonic_nanos(), checksum(data));
        self.copy_in(start, &message.encode());
        self.copy_in((start + MESSAGE_HEADER_SIZE as u64) & self.mask, data);

        fence(Ordering::Release);
        // Wait for earlier reservations to publish, then publish ours
        let mut spins = 0u32;
        while header
            .commit_frontier
            .0
            .compare_exchange_weak(start, end, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            if spins < COMMIT_SPIN_LIMIT {
                spins += 1;
                core::hint::spin_loop();
            } else {
                // The earlier writer may be descheduled mid-copy
                thread::yield_now();
            }
        }

        stats.record_write(data.len());
        Ok(())
    }

    /// Claim `total` bytes at the write frontier, returning the start offset
    fn reserve(&self, total: u64) -> Result<u64> {
        let header = self.header();
        let stats = &header.stats.0;

        let mut start = header.write_frontier.0.load(Ordering::Acquire);
        loop {
            let read = header.read_frontier.0.load(Ordering::Acquire);
            let available = self.capacity - self.occupied(start, read) - 1;
            if total > available {
                header.flags.0.is_full.store(true, Ordering::Relaxed);
                stats.record_full();
                tracing::trace!(needed = total, available, "write refused, ring full");
                return Err(RingError::Full {
                    needed: total as usize,
                    available: available as usize,
                });
            }

            let end = (start + total) & self.mask;
            match header.write_frontier.0.compare_exchange(
                start,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    header.flags.0.is_full.store(false, Ordering::Relaxed);
                    return Ok(start);
                }
                Err(current) => {
                    stats.record_retry();
                    start = current;
                }
            }
        }
    }

    /// Locate and verify the next committed frame
    ///
    /// Straddling payloads are reassembled into `scratch`. The read frontier
    /// is left alone; the caller hands `Frame::next` to [`RingBuffer::release`]
    /// once it is done with the payload.
    pub(crate) fn peek(&self, scratch: &mut Vec<u8>) -> Result<Frame> {
        let header = self.header();
        let stats = &header.stats.0;

        if let Err(corruption) = self.check() {
            return Err(self.read_corrupted(corruption));
        }

        let read = header.read_frontier.0.load(Ordering::Acquire);
        let commit = header.commit_frontier.0.load(Ordering::Acquire);
        let available = self.occupied(commit, read);
        if available < MESSAGE_HEADER_SIZE as u64 {
            return Err(RingError::Empty);
        }

        let mut raw = [0u8; MESSAGE_HEADER_SIZE];
        self.copy_out(read, &mut raw);
        let message = MessageHeader::decode(&raw);

        if message.magic != MESSAGE_MAGIC {
            return Err(self.read_corrupted(Corruption::MessageMagic {
                offset: read,
                got: message.magic,
            }));
        }
        if message.length == 0 || message.length as u64 > self.max_message_size {
            return Err(self.read_corrupted(Corruption::MessageLength {
                offset: read,
                length: message.length,
                max: self.max_message_size,
            }));
        }

        let len = message.length as usize;
        let total = frame_size(len) as u64;
        if available < total {
            return Err(RingError::Empty);
        }

        let payload_offset = (read + MESSAGE_HEADER_SIZE as u64) & self.mask;
        let zero_copy = payload_offset + len as u64 <= self.capacity;
        let payload: *const u8 = if zero_copy {
            unsafe { self.data.as_ptr().add(payload_offset as usize) }
        } else {
            scratch.clear();
            scratch.resize(len, 0);
            self.copy_out(payload_offset, scratch);
            scratch.as_ptr()
        };

        // SAFETY: payload points at `len` initialized bytes that no writer can
        // touch until the read frontier moves past them
        let computed = checksum(unsafe { std::slice::from_raw_parts(payload, len) });
        if computed != message.checksum {
            return Err(self.read_corrupted(Corruption::Checksum {
                offset: read,
                stored: message.checksum,
                computed,
            }));
        }

        stats.record_read(len);
        Ok(Frame {
            header: message,
            payload,
            len,
            zero_copy,
            next: (read + total) & self.mask,
        })
    }

    /// Hand the space of a consumed frame back to writers
    pub(crate) fn release(&self, next: u64) {
        let header = self.header();
        header.read_frontier.0.store(next, Ordering::Release);
        header.flags.0.is_full.store(false, Ordering::Relaxed);
    }

    fn read_corrupted(&self, corruption: Corruption) -> RingError {
        self.header().stats.0.record_read_error();
        tracing::warn!(%corruption, "corrupted ring buffer detected on read");
        corruption.into()
    }

    #[cfg(test)]
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Copy `bytes` into the data region at `offset`, wrapping at the end
    fn copy_in(&self, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        let first = bytes.len().min(self.capacity as usize - offset);
        unsafe {
            let base = self.data.as_ptr();
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(offset), first);
            ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, bytes.len() - first);
        }
    }

    /// Copy `out.len()` bytes out of the data region at `offset`, wrapping at the end
    fn copy_out(&self, offset: u64, out: &mut [u8]) {
        let offset = offset as usize;
        let first = out.len().min(self.capacity as usize - offset);
        unsafe {
            let base = self.data.as_ptr();
            ptr::copy_nonoverlapping(base.add(offset), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), out.len() - first);
        }
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("backing", &self.backing())
            .field("write_frontier", &header.write_frontier.0.load(Ordering::Relaxed))
            .field("commit_frontier", &header.commit_frontier.0.load(Ordering::Relaxed))
            .field("read_frontier", &header.read_frontier.0.load(Ordering::Relaxed))
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        tracing::debug!(
            capacity = self.capacity,
            backing = %self.region.kind(),
            owner = self.region.is_owner(),
            "ring buffer destroyed"
        );
    }
}

fn region_size(capacity: usize) -> Result<usize> {
    capacity
        .checked_add(DATA_OFFSET)
        .ok_or(RingError::InvalidParam("capacity overflows the address space"))
}

/// Payload bytes left once a header is carved out of `capacity - 1` and the
/// frame is rounded down to the message alignment
fn largest_payload(capacity: u64) -> u64 {
    (capacity.saturating_sub(1) & !(MESSAGE_ALIGN as u64 - 1)).saturating_sub(MESSAGE_HEADER_SIZE as u64)
}

/// `CLOCK_MONOTONIC` in nanoseconds; comparable across processes on one host
fn monotonic_nanos() -> u64 {
    let ts = rustix::time::clock_gettime(rustix::time::ClockId::Monotonic);
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}
