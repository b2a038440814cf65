//! Memory layout shared by every handle on a ring
//!
//! ```text
//! +----------------------+  offset 0
//! | RingHeader           |  magic, geometry, frontiers, flags, stats
//! +----------------------+  DATA_OFFSET (cache-line aligned)
//! | data region          |  `capacity` bytes of framed messages
//! +----------------------+
//! ```
//!
//! Each message in the data region is a 24-byte [`MessageHeader`] followed by
//! the payload, padded so the next frame starts on an 8-byte boundary. Frames
//! may wrap around the end of the data region.

use crate::stats::StatsBlock;
use std::sync::atomic::{AtomicBool, AtomicU64};

/// Magic number for ring validation ("RNGB")
pub const RING_MAGIC: u32 = 0x524E_4742;
pub const RING_VERSION: u32 = 1;

/// Magic number stamped on every message header ("EVMS")
pub const MESSAGE_MAGIC: u32 = 0x4556_4D53;

/// Every frame starts on this boundary
pub const MESSAGE_ALIGN: usize = 8;

/// Encoded size of [`MessageHeader`]
pub const MESSAGE_HEADER_SIZE: usize = 24;

/// Cache line size
pub const CACHE_LINE_SIZE: usize = 64;

/// Offset of the data region from the start of the backing region
pub const DATA_OFFSET: usize = align_up(std::mem::size_of::<RingHeader>(), CACHE_LINE_SIZE);

#[inline(always)]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Bytes a payload of `len` bytes occupies in the ring, header included
#[inline(always)]
pub const fn frame_size(len: usize) -> usize {
    align_up(MESSAGE_HEADER_SIZE + len, MESSAGE_ALIGN)
}

/// Ensures the wrapped value is on its own cache line
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Per-message header, little-endian on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct MessageHeader {
    pub magic: u32,
    /// Payload length in bytes
    pub length: u32,
    /// Producer-side `CLOCK_MONOTONIC` nanoseconds
    pub timestamp: u64,
    /// CRC-32 over the payload
    pub checksum: u32,
    pub reserved: u32,
}

const _: () = assert!(std::mem::size_of::<MessageHeader>() == MESSAGE_HEADER_SIZE);

impl MessageHeader {
    pub fn new(length: u32, timestamp: u64, checksum: u32) -> Self {
        Self {
            magic: MESSAGE_MAGIC,
            length,
            timestamp,
            checksum,
            reserved: 0,
        }
    }

    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut out = [0u8; MESSAGE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.length.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        out[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        out[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; MESSAGE_HEADER_SIZE]) -> Self {
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[8..16]);
        Self {
            magic: u32_at(0),
            length: u32_at(4),
            timestamp: u64::from_le_bytes(ts),
            checksum: u32_at(16),
            reserved: u32_at(20),
        }
    }
}

/// Ring control block stored at the beginning of the backing region
#[repr(C)]
pub struct RingHeader {
    pub magic: u32,
    pub version: u32,
    /// Size of the data region, a power of two
    pub capacity: u64,
    /// `f64::to_bits` of the backpressure threshold
    pub threshold_bits: u64,
    pub max_message_size: u64,
    /// Next reservable offset
    pub write_frontier: CacheAligned<AtomicU64>,
    /// End of the last fully published frame
    pub commit_frontier: CacheAligned<AtomicU64>,
    /// End of the last fully consumed frame
    pub read_frontier: CacheAligned<AtomicU64>,
    pub flags: CacheAligned<RingFlags>,
    pub stats: CacheAligned<StatsBlock>,
}

#[repr(C)]
pub struct RingFlags {
    pub is_full: AtomicBool,
    pub backpressure_active: AtomicBool,
    pub consumer_attached: AtomicBool,
}

impl RingHeader {
    pub fn new(capacity: u64, threshold: f64, max_message_size: u64) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            capacity,
            threshold_bits: threshold.to_bits(),
            max_message_size,
            write_frontier: CacheAligned(AtomicU64::new(0)),
            commit_frontier: CacheAligned(AtomicU64::new(0)),
            read_frontier: CacheAligned(AtomicU64::new(0)),
            flags: CacheAligned(RingFlags {
                is_full: AtomicBool::new(false),
                backpressure_active: AtomicBool::new(false),
                consumer_attached: AtomicBool::new(false),
            }),
            stats: CacheAligned(StatsBlock::new()),
        }
    }

    #[inline(always)]
    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits)
    }

    /// Total bytes needed to back a ring with `capacity` data bytes
    pub const fn region_size(capacity: usize) -> usize {
        DATA_OFFSET + capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_alignment() {
        assert_eq!(frame_size(1), 32);
        assert_eq!(frame_size(8), 32);
        assert_eq!(frame_size(9), 40);
        assert_eq!(frame_size(512), 536);
        assert_eq!(frame_size(0) % MESSAGE_ALIGN, 0);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = MessageHeader::new(0x0102_0304, 0x1122_3344_5566_7788, 0xAABB_CCDD);
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &MESSAGE_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[8], 0x88);
        assert_eq!(&bytes[16..20], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 0]);
        assert_eq!(MessageHeader::decode(&bytes), header);
    }

    #[test]
    fn test_data_offset_is_cache_aligned() {
        assert_eq!(DATA_OFFSET % CACHE_LINE_SIZE, 0);
        assert!(DATA_OFFSET >= std::mem::size_of::<RingHeader>());
    }
}
