//! Consumer side of the ring
//!
//! A [`Consumer`] is the only thing that can read from a ring. Each
//! [`Message`] it returns borrows the consumer, so a message cannot outlive
//! the next call to `read`, and the space it occupies is handed back to
//! writers only when the message is dropped.

use crate::error::{Result, RingError};
use crate::layout::MessageHeader;
use crate::ring::RingBuffer;
use std::fmt;
use std::ops::Deref;

/// Exclusive read handle on a ring
pub struct Consumer<'a> {
    ring: &'a RingBuffer,
    /// Reassembly space for payloads that wrap around the end of the ring
    scratch: Vec<u8>,
}

impl<'a> Consumer<'a> {
    pub(crate) fn new(ring: &'a RingBuffer) -> Self {
        Self {
            ring,
            scratch: Vec::new(),
        }
    }

    /// The ring this consumer drains
    pub fn ring(&self) -> &'a RingBuffer {
        self.ring
    }

    /// Take the next complete message
    ///
    /// Returns `Empty` when nothing (or only a partly published frame) is
    /// available, and `Corrupted` when the ring or the next frame fails an
    /// integrity check. Neither case moves the read frontier.
    pub fn read(&mut self) -> Result<Message<'_>> {
        let frame = self.ring.peek(&mut self.scratch)?;
        // SAFETY: the frame points either into the data region, which writers
        // leave alone until `release`, or into `self.scratch`, which stays
        // untouched while the message holds `&mut self`
        let payload = unsafe { std::slice::from_raw_parts(frame.payload, frame.len) };
        Ok(Message {
            ring: self.ring,
            header: frame.header,
            payload,
            zero_copy: frame.zero_copy,
            next: frame.next,
        })
    }

    /// Read until the ring is empty, handing every message to `f`
    ///
    /// Returns how many messages were delivered. Stops at the first error
    /// other than `Empty`.
    pub fn drain<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(Message<'_>),
    {
        let mut delivered = 0;
        loop {
            match self.read() {
                Ok(message) => {
                    f(message);
                    delivered += 1;
                }
                Err(RingError::Empty) => return Ok(delivered),
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for Consumer<'_> {
    fn drop(&mut self) {
        self.ring.detach_consumer();
    }
}

/// A verified message, borrowed from the ring (or the consumer's scratch
/// space when the payload wraps)
pub struct Message<'m> {
    ring: &'m RingBuffer,
    header: MessageHeader,
    payload: &'m [u8],
    zero_copy: bool,
    next: u64,
}

impl<'m> Message<'m> {
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Producer-side `CLOCK_MONOTONIC` timestamp in nanoseconds
    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        self.header.timestamp
    }

    #[inline]
    pub fn checksum(&self) -> u32 {
        self.header.checksum
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// `false` when the payload wrapped around the end of the ring and was
    /// copied out
    #[inline]
    pub fn is_zero_copy(&self) -> bool {
        self.zero_copy
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.payload.to_vec()
    }
}

impl Deref for Message<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.payload
    }
}

impl AsRef<[u8]> for Message<'_> {
    fn as_ref(&self) -> &[u8] {
        self.payload
    }
}

impl fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.payload.len())
            .field("timestamp_ns", &self.header.timestamp)
            .field("checksum", &format_args!("0x{:08X}", self.header.checksum))
            .field("zero_copy", &self.zero_copy)
            .finish()
    }
}

impl Drop for Message<'_> {
    fn drop(&mut self) {
        self.ring.release(self.next);
    }
}
