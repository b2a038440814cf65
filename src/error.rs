//! Error types for CaptureRing

use std::io;
use thiserror::Error;

/// Result type for CaptureRing operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors that can occur in CaptureRing operations
#[derive(Debug, Error)]
pub enum RingError {
    /// Null, zero-sized or otherwise malformed argument
    #[error("Invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Payload exceeds the configured maximum message size
    #[error("Message too large: max {max} bytes, got {got} bytes")]
    TooLarge { max: usize, got: usize },

    /// Not enough raw space left for the framed message
    #[error("Ring buffer full: need {needed} bytes, {available} available")]
    Full { needed: usize, available: usize },

    /// Utilization crossed the admission threshold
    #[error("Backpressure: utilization {utilization:.3} >= threshold {threshold:.3}")]
    Backpressure { utilization: f64, threshold: f64 },

    /// No complete message is available yet
    #[error("Ring buffer is empty")]
    Empty,

    /// Structural or payload integrity violation
    #[error("Ring buffer corrupted: {0}")]
    Corrupted(#[from] Corruption),

    /// Another consumer already holds the read side
    #[error("A consumer is already attached to this ring")]
    ConsumerAttached,

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Heap fallback allocation failed
    #[error("Failed to allocate {size} bytes for the backing region")]
    Alloc { size: usize },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },
}

impl RingError {
    /// `Full`, `Backpressure` and `Empty` clear up on their own once the other
    /// side makes progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RingError::Full { .. } | RingError::Backpressure { .. } | RingError::Empty
        )
    }

    /// The ring can no longer be trusted and should be recreated.
    pub fn is_corruption(&self) -> bool {
        matches!(self, RingError::Corrupted(_))
    }
}

/// What exactly failed an integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("invalid ring magic: expected 0x{expected:08X}, got 0x{got:08X}")]
    RingMagic { expected: u32, got: u32 },

    #[error("unsupported ring version {got} (expected {expected})")]
    RingVersion { expected: u32, got: u32 },

    #[error("capacity {got} is not a power of two matching the mapped region ({expected})")]
    Capacity { expected: u64, got: u64 },

    #[error("{frontier} frontier {value} outside [0, {capacity})")]
    FrontierOutOfRange {
        frontier: &'static str,
        value: u64,
        capacity: u64,
    },

    #[error("invalid message magic at offset {offset}: 0x{got:08X}")]
    MessageMagic { offset: u64, got: u32 },

    #[error("message length {length} at offset {offset} exceeds max {max}")]
    MessageLength { offset: u64, length: u32, max: u64 },

    #[error("checksum mismatch at offset {offset}: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    Checksum {
        offset: u64,
        stored: u32,
        computed: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RingError::Empty.is_retryable());
        assert!(RingError::Full { needed: 64, available: 8 }.is_retryable());
        assert!(RingError::Backpressure { utilization: 0.9, threshold: 0.8 }.is_retryable());
        assert!(!RingError::InvalidParam("data").is_retryable());
        assert!(!RingError::TooLarge { max: 1, got: 2 }.is_retryable());

        let err: RingError = Corruption::RingMagic { expected: 1, got: 2 }.into();
        assert!(err.is_corruption());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_names_the_failure() {
        let err = RingError::from(Corruption::Checksum {
            offset: 128,
            stored: 0xDEADBEEF,
            computed: 0x0BADF00D,
        });
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch at offset 128"));
        assert!(msg.contains("0xDEADBEEF"));
    }
}
