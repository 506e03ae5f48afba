//! Thread-local last-error plus a process-wide circular buffer (§4.L).
//!
//! Every field here is fixed-size and `Copy` so the signal handler
//! (`corvid-jit`) can read the ring without taking a lock or allocating —
//! it only ever reads, and a torn read just yields a stale-looking record,
//! which is acceptable for a post-mortem dump.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

use crate::error_code::ErrorCode;

const FUNCTION_CAP: usize = 48;
const MESSAGE_CAP: usize = 160;
const RING_CAPACITY: usize = 16;

/// A single POD error record. Signal-safe to read; writers must hold
/// [`RING_LOCK`] (for ring slots) — the thread-local slot needs no lock.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ErrorRecord {
    /// The reported error code. [`ErrorCode::Ok`] means "unused slot".
    pub code: ErrorCode,
    function: [u8; FUNCTION_CAP],
    function_len: u8,
    message: [u8; MESSAGE_CAP],
    message_len: u8,
}

impl ErrorRecord {
    const BLANK: ErrorRecord = ErrorRecord {
        code: ErrorCode::Ok,
        function: [0; FUNCTION_CAP],
        function_len: 0,
        message: [0; MESSAGE_CAP],
        message_len: 0,
    };

    fn fill(code: ErrorCode, function: &str, message: &str) -> ErrorRecord {
        let mut record = ErrorRecord::BLANK;
        record.code = code;
        let flen = function.len().min(FUNCTION_CAP);
        record.function[..flen].copy_from_slice(&function.as_bytes()[..flen]);
        record.function_len = flen as u8;
        let mlen = message.len().min(MESSAGE_CAP);
        record.message[..mlen].copy_from_slice(&message.as_bytes()[..mlen]);
        record.message_len = mlen as u8;
        record
    }

    /// The function name, truncated to [`FUNCTION_CAP`] bytes at construction.
    pub fn function(&self) -> &str {
        std::str::from_utf8(&self.function[..self.function_len as usize]).unwrap_or("")
    }

    /// The message text, truncated to [`MESSAGE_CAP`] bytes at construction.
    pub fn message(&self) -> &str {
        std::str::from_utf8(&self.message[..self.message_len as usize]).unwrap_or("")
    }

    /// Raw bytes of the function-name buffer, for async-signal-safe writers
    /// that cannot call into `std::io` formatting machinery.
    pub fn function_bytes(&self) -> &[u8] {
        &self.function[..self.function_len as usize]
    }

    /// Raw bytes of the message buffer, for async-signal-safe writers.
    pub fn message_bytes(&self) -> &[u8] {
        &self.message[..self.message_len as usize]
    }
}

impl Default for ErrorRecord {
    fn default() -> Self {
        ErrorRecord::BLANK
    }
}

thread_local! {
    static LAST_ERROR: RefCell<ErrorRecord> = RefCell::new(ErrorRecord::BLANK);
}

struct Ring {
    slots: [ErrorRecord; RING_CAPACITY],
}

static RING: Mutex<Ring> = Mutex::new(Ring {
    slots: [ErrorRecord::BLANK; RING_CAPACITY],
});
static RING_INDEX: AtomicUsize = AtomicUsize::new(0);

/// Record an error: update the calling thread's last-error slot, then copy
/// the same record into `slot = index mod RING_CAPACITY` of the process-wide
/// ring under a lightweight mutex, per §4.L.
pub fn set_error(code: ErrorCode, function: &str, message: &str) {
    let record = ErrorRecord::fill(code, function, message);
    LAST_ERROR.with(|cell| *cell.borrow_mut() = record);

    let idx = RING_INDEX.fetch_add(1, Ordering::Relaxed) % RING_CAPACITY;
    RING.lock().slots[idx] = record;
}

/// The calling thread's last recorded error.
pub fn get_last_error() -> ErrorRecord {
    LAST_ERROR.with(|cell| *cell.borrow())
}

/// Reset the calling thread's last-error slot. Does not touch the
/// process-wide ring (other threads' history of a fault is exactly what the
/// signal handler wants to see).
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = ErrorRecord::BLANK);
}

/// Reset both the calling thread's last-error slot and the process-wide ring.
pub fn clear_errors() {
    clear_last_error();
    *RING.lock() = Ring {
        slots: [ErrorRecord::BLANK; RING_CAPACITY],
    };
}

/// Snapshot of the ring for ordinary (non-signal) callers, oldest first.
pub fn recent_errors() -> Vec<ErrorRecord> {
    RING.lock().slots.to_vec()
}

/// Async-signal-safe access to the ring: `f` is invoked with each occupied
/// slot, in ring order, without ever taking a lock. Callable from inside a
/// signal handler: reads the ring's raw memory and accepts a torn read as
/// the cost of not blocking on a mutex that might be held by the very
/// thread that faulted.
///
/// # Safety
/// Must only be used from within a signal handler or other context where
/// taking `RING`'s mutex is unsafe (the faulting thread may already hold it).
pub unsafe fn for_each_recent_error_signal_safe(mut f: impl FnMut(&ErrorRecord)) {
    // `data_ptr` hands back a raw pointer to the guarded value without
    // attempting to acquire the lock — exactly what a handler running on
    // the faulting thread needs, since that thread might be the lock holder.
    let data: *const Ring = RING.data_ptr();
    let slots = &(*data).slots;
    for slot in slots.iter() {
        if !slot.code.is_ok() {
            f(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_round_trips() {
        clear_errors();
        set_error(ErrorCode::OutOfMemory, "alloc_vec", "requested 64 bytes");
        let record = get_last_error();
        assert_eq!(record.code, ErrorCode::OutOfMemory);
        assert_eq!(record.function(), "alloc_vec");
        assert_eq!(record.message(), "requested 64 bytes");
    }

    #[test]
    fn clear_last_error_blanks_thread_slot() {
        set_error(ErrorCode::InvalidPointer, "free_vec", "unknown pointer");
        clear_last_error();
        let record = get_last_error();
        assert!(record.code.is_ok());
        assert_eq!(record.function(), "");
    }

    #[test]
    fn ring_wraps_after_capacity_records() {
        clear_errors();
        for i in 0..(RING_CAPACITY + 3) {
            set_error(ErrorCode::InvalidArgument, "fn", &format!("iteration {i}"));
        }
        let snapshot = recent_errors();
        assert_eq!(snapshot.len(), RING_CAPACITY);
        assert!(snapshot.iter().all(|r| r.code == ErrorCode::InvalidArgument));
    }

    #[test]
    fn truncates_overlong_function_and_message() {
        let long_fn = "f".repeat(FUNCTION_CAP + 10);
        let long_msg = "m".repeat(MESSAGE_CAP + 10);
        set_error(ErrorCode::FileIo, &long_fn, &long_msg);
        let record = get_last_error();
        assert_eq!(record.function().len(), FUNCTION_CAP);
        assert_eq!(record.message().len(), MESSAGE_CAP);
    }

    #[test]
    fn signal_safe_iteration_sees_occupied_slots() {
        clear_errors();
        set_error(ErrorCode::DoubleFree, "free_object", "pointer already freed");
        let mut seen = 0;
        unsafe {
            for_each_recent_error_signal_safe(|record| {
                assert_eq!(record.code, ErrorCode::DoubleFree);
                seen += 1;
            });
        }
        assert_eq!(seen, 1);
    }
}
