//! Ring configuration, supplied once at create time

use crate::error::{Result, RingError};
use crate::layout::MESSAGE_HEADER_SIZE;

/// Default data region size (64 MiB)
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Default largest accepted payload (16 MiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Writes are refused once this fraction of the ring is occupied
pub const DEFAULT_BACKPRESSURE_THRESHOLD: f64 = 0.8;

/// Smallest data region we will build
pub const MIN_CAPACITY: usize = 64;

/// Where the data region comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backing {
    /// Anonymous virtual-memory mapping, falling back to the heap
    #[default]
    Auto,
    /// Always use a zeroed heap allocation
    Heap,
}

/// Ring configuration
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Requested data region size in bytes, rounded up to a power of two
    pub capacity: usize,
    /// Utilization in (0, 1] at which writes start failing with `Backpressure`
    pub backpressure_threshold: f64,
    /// Largest payload a single write may carry
    pub max_message_size: usize,
    /// Backing strategy for in-process rings
    pub backing: Backing,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            max_message_size: MAX_MESSAGE_SIZE,
            backing: Backing::Auto,
        }
    }
}

impl RingConfig {
    /// Default configuration with the given requested capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.backpressure_threshold = threshold;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    /// Capacity actually allocated: 0 maps to the default, everything else is
    /// rounded up to the next power of two (and never below `MIN_CAPACITY`).
    pub fn effective_capacity(&self) -> Result<usize> {
        if self.capacity == 0 {
            return Ok(DEFAULT_CAPACITY);
        }
        self.capacity
            .max(MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(RingError::InvalidParam("capacity overflows the address space"))
    }

    /// Check the configuration and return the normalized capacity
    pub fn validate(&self) -> Result<usize> {
        let threshold = self.backpressure_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(RingError::InvalidParam(
                "backpressure threshold must lie in (0, 1]",
            ));
        }
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(RingError::InvalidParam(
                "max message size must fit a 32-bit length",
            ));
        }

        let capacity = self.effective_capacity()?;
        if capacity <= MESSAGE_HEADER_SIZE {
            return Err(RingError::InvalidParam("capacity cannot hold a message header"));
        }
        Ok(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(RingConfig::new(0).effective_capacity().unwrap(), DEFAULT_CAPACITY);
        assert_eq!(RingConfig::new(1000).effective_capacity().unwrap(), 1024);
        assert_eq!(RingConfig::new(4096).effective_capacity().unwrap(), 4096);
        assert_eq!(RingConfig::new(1).effective_capacity().unwrap(), MIN_CAPACITY);
        assert!(RingConfig::new(usize::MAX).effective_capacity().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(RingConfig::new(4096).with_threshold(1.0).validate().is_ok());
        assert!(RingConfig::new(4096).with_threshold(0.01).validate().is_ok());
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            assert!(matches!(
                RingConfig::new(4096).with_threshold(bad).validate(),
                Err(RingError::InvalidParam(_))
            ));
        }
    }

    #[test]
    fn test_max_message_size_bounds() {
        assert!(RingConfig::new(4096).with_max_message_size(0).validate().is_err());
        assert!(RingConfig::new(4096).with_max_message_size(512).validate().is_ok());
    }
}
