//! CaptureRing - lock-free shared memory ring buffer for framed event messages
//!
//! Event collectors push serialized events into a fixed-capacity ring; a
//! single downstream consumer drains them without copying. The ring can live
//! in private memory (threads in one process) or in named POSIX shared memory
//! (collector and consumer in separate processes).
//!
//! # Architecture
//!
//! - **Writers (collectors)**: any number, reserve space with a compare-and-swap
//!   loop, copy a checksummed frame and publish it in reservation order
//! - **Reader (consumer)**: exactly one, gets zero-copy views of verified frames
//! - **Backpressure**: writes are refused above a utilization threshold,
//!   before the ring is physically full
//!
//! Neither side ever blocks on the other; `Full`, `Backpressure` and `Empty`
//! come back as errors and retry policy stays with the caller.
//!
//! ```no_run
//! use capture_ring::{RingBuffer, RingError};
//!
//! let ring = RingBuffer::create(1 << 20)?;
//! ring.write(b"key:a")?;
//!
//! let mut consumer = ring.consumer()?;
//! match consumer.read() {
//!     Ok(msg) => assert_eq!(msg.payload(), b"key:a"),
//!     Err(RingError::Empty) => {}
//!     Err(e) => return Err(e),
//! }
//! # Ok::<(), RingError>(())
//! ```

pub mod error;
pub mod checksum;
pub mod config;
pub mod layout;
pub mod stats;
pub mod shm;
pub mod ring;
pub mod reader;
pub mod bindings;

pub use error::{Corruption, Result, RingError};
pub use config::{Backing, RingConfig, DEFAULT_BACKPRESSURE_THRESHOLD, DEFAULT_CAPACITY, MAX_MESSAGE_SIZE};
pub use layout::{MessageHeader, MESSAGE_ALIGN, MESSAGE_HEADER_SIZE};
pub use reader::{Consumer, Message};
pub use ring::RingBuffer;
pub use shm::RegionKind;
pub use stats::RingStats;
