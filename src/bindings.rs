//! C Bindings for CaptureRing
//!
//! Provides a raw C API so collectors and consumers written in other
//! languages can share a ring. Every call returns a [`CaptureRingStatus`];
//! null pointers and zero sizes are reported as `InvalidParam`.
//!
//! A handle may be shared by several writer threads. Reads must come from one
//! thread at a time, and the pointer handed out by `capture_ring_read` stays
//! valid until the next read or destroy on the same handle. Every entry point
//! only ever borrows the handle shared; read state sits in its own cell.

use crate::config::{RingConfig, DEFAULT_BACKPRESSURE_THRESHOLD, MAX_MESSAGE_SIZE};
use crate::error::RingError;
use crate::ring::RingBuffer;
use crate::stats::RingStats;
use std::cell::UnsafeCell;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::slice;

/// Opaque handle
pub struct CaptureRingHandle {
    ring: RingBuffer,
    /// Only touched by `capture_ring_read` (one caller at a time) and drop
    reader: UnsafeCell<ReadState>,
}

#[derive(Default)]
struct ReadState {
    scratch: Vec<u8>,
    /// Read frontier of the message last handed to C, released on the next read
    pending: Option<u64>,
    consumer: bool,
}

impl CaptureRingHandle {
    fn new(ring: RingBuffer) -> Self {
        Self {
            ring,
            reader: UnsafeCell::new(ReadState::default()),
        }
    }
}

impl Drop for CaptureRingHandle {
    fn drop(&mut self) {
        let reader = self.reader.get_mut();
        if let Some(next) = reader.pending.take() {
            self.ring.release(next);
        }
        if reader.consumer {
            self.ring.detach_consumer();
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRingStatus {
    Ok = 0,
    InvalidParam = -1,
    TooLarge = -2,
    Full = -3,
    Backpressure = -4,
    Empty = -5,
    Corrupted = -6,
    ConsumerAttached = -7,
    System = -8,
}

impl From<&RingError> for CaptureRingStatus {
    fn from(err: &RingError) -> Self {
        match err {
            RingError::InvalidParam(_) | RingError::NamespaceTooLong { .. } => {
                CaptureRingStatus::InvalidParam
            }
            RingError::TooLarge { .. } => CaptureRingStatus::TooLarge,
            RingError::Full { .. } => CaptureRingStatus::Full,
            RingError::Backpressure { .. } => CaptureRingStatus::Backpressure,
            RingError::Empty => CaptureRingStatus::Empty,
            RingError::Corrupted(_) => CaptureRingStatus::Corrupted,
            RingError::ConsumerAttached => CaptureRingStatus::ConsumerAttached,
            RingError::ShmCreate { .. }
            | RingError::ShmOpen { .. }
            | RingError::Mmap(_)
            | RingError::Truncate(_)
            | RingError::Alloc { .. } => CaptureRingStatus::System,
        }
    }
}

/// Zero fields select the defaults
#[repr(C)]
pub struct CaptureRingConfig {
    pub capacity: usize,
    pub backpressure_threshold: f64,
    pub max_message_size: usize,
}

impl From<&CaptureRingConfig> for RingConfig {
    fn from(config: &CaptureRingConfig) -> Self {
        let threshold = if config.backpressure_threshold == 0.0 {
            DEFAULT_BACKPRESSURE_THRESHOLD
        } else {
            config.backpressure_threshold
        };
        let max = if config.max_message_size == 0 {
            MAX_MESSAGE_SIZE
        } else {
            config.max_message_size
        };
        RingConfig::new(config.capacity)
            .with_threshold(threshold)
            .with_max_message_size(max)
    }
}

fn into_handle(result: crate::Result<RingBuffer>) -> *mut CaptureRingHandle {
    match result {
        Ok(ring) => Box::into_raw(Box::new(CaptureRingHandle::new(ring))),
        Err(err) => {
            tracing::debug!(error = %err, "capture_ring handle creation failed");
            ptr::null_mut()
        }
    }
}

unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

/// Create an in-process ring. Returns null on failure.
#[no_mangle]
pub extern "C" fn capture_ring_create(config: CaptureRingConfig) -> *mut CaptureRingHandle {
    into_handle(RingBuffer::with_config(&RingConfig::from(&config)))
}

/// Create a ring in named shared memory. Returns null on failure.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn capture_ring_create_shared(
    name: *const c_char,
    config: CaptureRingConfig,
) -> *mut CaptureRingHandle {
    match name_arg(name) {
        Some(name) => into_handle(RingBuffer::create_shared(name, &RingConfig::from(&config))),
        None => ptr::null_mut(),
    }
}

/// Attach to a ring created by another process. Returns null on failure.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn capture_ring_open_shared(name: *const c_char) -> *mut CaptureRingHandle {
    match name_arg(name) {
        Some(name) => into_handle(RingBuffer::open_shared(name)),
        None => ptr::null_mut(),
    }
}

/// Destroy a handle
///
/// # Safety
/// handle must come from one of the create/open functions and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn capture_ring_destroy(handle: *mut CaptureRingHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Write one message
///
/// # Safety
/// data must point to len readable bytes
#[no_mangle]
pub unsafe extern "C" fn capture_ring_write(
    handle: *const CaptureRingHandle,
    data: *const u8,
    len: usize,
) -> CaptureRingStatus {
    if handle.is_null() || data.is_null() || len == 0 {
        return CaptureRingStatus::InvalidParam;
    }
    let handle = &*handle;
    match handle.ring.write(slice::from_raw_parts(data, len)) {
        Ok(()) => CaptureRingStatus::Ok,
        Err(err) => CaptureRingStatus::from(&err),
    }
}

/// Read the next message
///
/// On success `*out_data`/`*out_len` describe the payload and
/// `*out_timestamp` (if not null) receives the producer timestamp. The first
/// read claims the consumer side of the ring for this handle.
///
/// # Safety
/// handle must be valid and not read from concurrently; out pointers must be writable
#[no_mangle]
pub unsafe extern "C" fn capture_ring_read(
    handle: *const CaptureRingHandle,
    out_data: *mut *const u8,
    out_len: *mut usize,
    out_timestamp: *mut u64,
) -> CaptureRingStatus {
    if handle.is_null() || out_data.is_null() || out_len.is_null() {
        return CaptureRingStatus::InvalidParam;
    }
    let handle = &*handle;
    // SAFETY: callers never read from one handle concurrently, and writers
    // reach only `handle.ring`, so this is the sole borrow of the read state
    let reader = &mut *handle.reader.get();

    if !reader.consumer {
        if !handle.ring.try_attach_consumer() {
            return CaptureRingStatus::ConsumerAttached;
        }
        reader.consumer = true;
    }
    if let Some(next) = reader.pending.take() {
        handle.ring.release(next);
    }

    match handle.ring.peek(&mut reader.scratch) {
        Ok(frame) => {
            *out_data = frame.payload;
            *out_len = frame.len;
            if !out_timestamp.is_null() {
                *out_timestamp = frame.header.timestamp;
            }
            reader.pending = Some(frame.next);
            CaptureRingStatus::Ok
        }
        Err(err) => CaptureRingStatus::from(&err),
    }
}

/// Utilization in [0, 1), or a negative value for a null handle
///
/// # Safety
/// handle must be valid or null
#[no_mangle]
pub unsafe extern "C" fn capture_ring_utilization(handle: *const CaptureRingHandle) -> f64 {
    if handle.is_null() {
        return -1.0;
    }
    (*handle).ring.utilization()
}

/// # Safety
/// handle must be valid or null
#[no_mangle]
pub unsafe extern "C" fn capture_ring_is_backpressure_active(
    handle: *const CaptureRingHandle,
) -> bool {
    !handle.is_null() && (*handle).ring.is_backpressure_active()
}

/// # Safety
/// handle must be valid or null; out must be writable
#[no_mangle]
pub unsafe extern "C" fn capture_ring_get_stats(
    handle: *const CaptureRingHandle,
    out: *mut RingStats,
) -> CaptureRingStatus {
    if handle.is_null() || out.is_null() {
        return CaptureRingStatus::InvalidParam;
    }
    *out = (*handle).ring.stats();
    CaptureRingStatus::Ok
}

/// # Safety
/// handle must be valid or null
#[no_mangle]
pub unsafe extern "C" fn capture_ring_reset_stats(
    handle: *const CaptureRingHandle,
) -> CaptureRingStatus {
    if handle.is_null() {
        return CaptureRingStatus::InvalidParam;
    }
    (*handle).ring.reset_stats();
    CaptureRingStatus::Ok
}

/// # Safety
/// handle must be valid or null
#[no_mangle]
pub unsafe extern "C" fn capture_ring_validate(handle: *const CaptureRingHandle) -> bool {
    !handle.is_null() && (*handle).ring.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize) -> CaptureRingConfig {
        CaptureRingConfig {
            capacity,
            backpressure_threshold: 0.0,
            max_message_size: 0,
        }
    }

    #[test]
    fn test_c_roundtrip() {
        let handle = capture_ring_create(config(4096));
        assert!(!handle.is_null());

        unsafe {
            assert!(capture_ring_validate(handle));
            let msg = b"fs:create /tmp/x";
            assert_eq!(
                capture_ring_write(handle, msg.as_ptr(), msg.len()),
                CaptureRingStatus::Ok
            );

            let mut data = ptr::null();
            let mut len = 0usize;
            let mut ts = 0u64;
            assert_eq!(
                capture_ring_read(handle, &mut data, &mut len, &mut ts),
                CaptureRingStatus::Ok
            );
            assert_eq!(slice::from_raw_parts(data, len), msg);
            assert!(ts > 0);

            assert_eq!(
                capture_ring_read(handle, &mut data, &mut len, ptr::null_mut()),
                CaptureRingStatus::Empty
            );
            assert_eq!(capture_ring_utilization(handle), 0.0);

            let mut stats = RingStats::default();
            assert_eq!(capture_ring_get_stats(handle, &mut stats), CaptureRingStatus::Ok);
            assert_eq!(stats.messages_written, 1);
            assert_eq!(stats.messages_read, 1);
            assert_eq!(capture_ring_reset_stats(handle), CaptureRingStatus::Ok);
            capture_ring_get_stats(handle, &mut stats);
            assert_eq!(stats, RingStats::default());

            capture_ring_destroy(handle);
        }
    }

    #[test]
    fn test_c_writers_share_handle_with_reader() {
        const WRITERS: usize = 3;
        const PER_WRITER: usize = 500;

        struct Shared(*const CaptureRingHandle);
        unsafe impl Send for Shared {}
        unsafe impl Sync for Shared {}

        let handle = Shared(capture_ring_create(config(16 * 1024)));
        assert!(!handle.0.is_null());

        let received = std::thread::scope(|s| {
            let shared = &handle;
            for w in 0..WRITERS {
                s.spawn(move || {
                    let msg = [w as u8; 12];
                    let mut sent = 0;
                    while sent < PER_WRITER {
                        match unsafe { capture_ring_write(shared.0, msg.as_ptr(), msg.len()) } {
                            CaptureRingStatus::Ok => sent += 1,
                            CaptureRingStatus::Backpressure | CaptureRingStatus::Full => {
                                std::thread::yield_now()
                            }
                            other => panic!("write failed: {other:?}"),
                        }
                    }
                });
            }

            let mut received = 0;
            let mut data = ptr::null();
            let mut len = 0usize;
            while received < WRITERS * PER_WRITER {
                match unsafe { capture_ring_read(shared.0, &mut data, &mut len, ptr::null_mut()) } {
                    CaptureRingStatus::Ok => {
                        assert_eq!(len, 12);
                        received += 1;
                    }
                    CaptureRingStatus::Empty => std::thread::yield_now(),
                    other => panic!("read failed: {other:?}"),
                }
            }
            received
        });

        assert_eq!(received, WRITERS * PER_WRITER);
        unsafe {
            let mut stats = RingStats::default();
            capture_ring_get_stats(handle.0, &mut stats);
            assert_eq!(stats.messages_read, (WRITERS * PER_WRITER) as u64);
            capture_ring_destroy(handle.0 as *mut CaptureRingHandle);
        }
    }

    #[test]
    fn test_c_invalid_params() {
        unsafe {
            assert_eq!(
                capture_ring_write(ptr::null(), b"x".as_ptr(), 1),
                CaptureRingStatus::InvalidParam
            );
            let handle = capture_ring_create(config(1024));
            assert_eq!(
                capture_ring_write(handle, ptr::null(), 1),
                CaptureRingStatus::InvalidParam
            );
            assert_eq!(
                capture_ring_write(handle, b"x".as_ptr(), 0),
                CaptureRingStatus::InvalidParam
            );
            let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
            assert_eq!(
                capture_ring_write(handle, big.as_ptr(), big.len()),
                CaptureRingStatus::TooLarge
            );
            assert!(!capture_ring_validate(ptr::null()));
            assert!(capture_ring_utilization(ptr::null()) < 0.0);
            assert!(capture_ring_create_shared(ptr::null(), config(1024)).is_null());
            capture_ring_destroy(handle);
        }

        let bad = CaptureRingConfig {
            capacity: 1024,
            backpressure_threshold: 2.0,
            max_message_size: 0,
        };
        assert!(capture_ring_create(bad).is_null());
    }
}
