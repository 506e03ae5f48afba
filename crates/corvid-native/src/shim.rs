//! The flat `extern "C"` HeapManager surface (§4.N, §6).
//!
//! Every function here is a thin wrapper, per §9's rewrite guidance,
//! around the process-wide [`Runtime`](crate::runtime::Runtime) looked up
//! through [`crate::runtime::current`]. Every exported symbol is
//! `corvid_`-prefixed so it cannot collide with libc's own
//! `malloc`/`free` family when this crate ships as a `cdylib`/`staticlib`.
//!
//! "Retained" variants (`corvid_alloc_*_retained`) compose an allocation
//! with [`Samm::retain`](corvid_heap::Samm::retain) in one call, for
//! emitted code that returns a freshly built value out of the scope that
//! allocated it (§4.E "RETAIN").

use std::ptr;

use corvid_heap::RawListHeader;

use crate::runtime::current;

fn track_if_enabled(addr: *mut u8) {
    if addr.is_null() {
        return;
    }
    let runtime = current();
    if runtime.samm.is_enabled() {
        runtime.samm.track(addr as usize);
    }
}

fn track_and_retain(addr: *mut u8, levels_up: u64) {
    if addr.is_null() {
        return;
    }
    let runtime = current();
    if runtime.samm.is_enabled() {
        runtime.samm.track(addr as usize);
        runtime.samm.retain(addr as usize, levels_up as usize);
    }
}

// ---------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------

/// `alloc_vec(n)` (§4.D), tracked into the current scope if SAMM is
/// enabled. Returns null on allocation failure (tier-1 error, posted to
/// the error ring by the underlying tracked-heap call).
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_vec(n: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_vec(n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_if_enabled(ptr);
    ptr
}

/// Like [`corvid_alloc_vec`] but also retains the result `levels_up`
/// scopes above the current one.
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_vec_retained(n: u64, levels_up: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_vec(n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_and_retain(ptr, levels_up);
    ptr
}

/// `resize_vec` (§4.D): reallocates in place, preserving the length
/// prefix, and returns the new payload pointer.
#[no_mangle]
pub unsafe extern "C" fn corvid_resize_vec(payload: *mut u8, new_n: u64) -> *mut u8 {
    let Some(payload) = std::ptr::NonNull::new(payload) else {
        return ptr::null_mut();
    };
    current()
        .heap
        .resize_vec(payload, new_n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut())
}

/// `free(payload)` dispatched against a vector payload.
#[no_mangle]
pub unsafe extern "C" fn corvid_free_vec(payload: *mut u8) {
    if payload.is_null() {
        return;
    }
    current().heap.free(payload as usize);
}

// ---------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------

/// `alloc_string(n)` (§4.D).
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_string(n: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_string(n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_if_enabled(ptr);
    ptr
}

/// Like [`corvid_alloc_string`] but also retains the result `levels_up`
/// scopes above the current one.
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_string_retained(n: u64, levels_up: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_string(n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_and_retain(ptr, levels_up);
    ptr
}

/// `resize_string` (§4.D).
#[no_mangle]
pub unsafe extern "C" fn corvid_resize_string(payload: *mut u8, new_n: u64) -> *mut u8 {
    let Some(payload) = std::ptr::NonNull::new(payload) else {
        return ptr::null_mut();
    };
    current()
        .heap
        .resize_string(payload, new_n as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut())
}

/// `free(payload)` dispatched against a string payload.
#[no_mangle]
pub unsafe extern "C" fn corvid_free_string(payload: *mut u8) {
    if payload.is_null() {
        return;
    }
    current().heap.free(payload as usize);
}

// ---------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------

/// `alloc_object(size)` (§4.D).
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_object(size: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_object(size as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_if_enabled(ptr);
    ptr
}

/// Like [`corvid_alloc_object`] but also retains the result `levels_up`
/// scopes above the current one.
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_object_retained(size: u64, levels_up: u64) -> *mut u8 {
    let ptr = current()
        .heap
        .alloc_object(size as usize)
        .map(|p| p.as_ptr())
        .unwrap_or(ptr::null_mut());
    track_and_retain(ptr, levels_up);
    ptr
}

/// `free(payload)` dispatched against an object.
#[no_mangle]
pub unsafe extern "C" fn corvid_free_object(payload: *mut u8) {
    if payload.is_null() {
        return;
    }
    current().heap.free(payload as usize);
}

// ---------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------

/// `alloc_list()` (§4.D), tracked under freelist origin (§4.E).
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_list() -> *mut RawListHeader {
    let runtime = current();
    let header = runtime.heap.alloc_list();
    if runtime.samm.is_enabled() {
        runtime.samm.track_freelist(header.as_ptr() as usize);
    }
    header.as_ptr()
}

/// Like [`corvid_alloc_list`] but also retains the result `levels_up`
/// scopes above the current one.
#[no_mangle]
pub unsafe extern "C" fn corvid_alloc_list_retained(levels_up: u64) -> *mut RawListHeader {
    let runtime = current();
    let header = runtime.heap.alloc_list();
    if runtime.samm.is_enabled() {
        let addr = header.as_ptr() as usize;
        runtime.samm.track_freelist(addr);
        runtime.samm.retain(addr, levels_up as usize);
    }
    header.as_ptr()
}

/// `free(payload)` dispatched against a list header; cascades through
/// every atom the header owns (§4.F "Ownership semantics").
#[no_mangle]
pub unsafe extern "C" fn corvid_free_list(header: *mut RawListHeader) {
    if header.is_null() {
        return;
    }
    current().heap.free(header as usize);
}

// ---------------------------------------------------------------------
// SAMM scope control (§4.E, §4.N)
// ---------------------------------------------------------------------

/// Push a new scope.
#[no_mangle]
pub unsafe extern "C" fn corvid_enter_scope() {
    current().samm.enter_scope();
}

/// Pop the top scope, handing it to the background worker for off-thread
/// reclamation.
#[no_mangle]
pub unsafe extern "C" fn corvid_exit_scope() {
    current().samm.exit_scope();
}

/// Move `ptr` from the current scope to the scope `levels_up` ancestors
/// above it (§4.E "RETAIN").
#[no_mangle]
pub unsafe extern "C" fn corvid_retain_pointer(ptr: *mut u8, levels_up: u64) {
    if ptr.is_null() {
        return;
    }
    current().samm.retain(ptr as usize, levels_up as usize);
}

/// Enable or disable SAMM scope tracking process-wide.
#[no_mangle]
pub unsafe extern "C" fn corvid_set_samm_enabled(enabled: u8) {
    current().samm.set_enabled(enabled != 0);
}

/// Whether SAMM scope tracking is currently enabled. Returns `1`/`0`
/// rather than `bool` to stay within the flat-C-ABI value set.
#[no_mangle]
pub unsafe extern "C" fn corvid_is_samm_enabled() -> u8 {
    current().samm.is_enabled() as u8
}

/// Block until every scope exited so far has been fully reclaimed.
#[no_mangle]
pub unsafe extern "C" fn corvid_wait_for_samm() {
    current().samm.wait_for_drain();
}

/// Synchronously drain the cleanup queue on the calling thread.
#[no_mangle]
pub unsafe extern "C" fn corvid_handle_memory_pressure() {
    current().samm.handle_memory_pressure();
}

/// Drain the cleanup queue, join the background worker, and release any
/// remaining scope lists directly. The only cancellation point (§5).
#[no_mangle]
pub unsafe extern "C" fn corvid_shutdown() {
    current().samm.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // `current()` is a genuine process-wide singleton (by design — see
    // `crate::runtime`), so tests that flip SAMM on/off or push/pop scopes
    // would otherwise race every other test in this binary. Serialize them
    // behind one lock; a poisoned lock (a prior test panicked mid-scope)
    // still lets later tests proceed rather than cascading failures.
    static TEST_LOCK: Mutex<()> = Mutex::new(());
    fn serialize_test() -> MutexGuard<'static, ()> {
        TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn alloc_object_round_trips_through_free() {
        let _guard = serialize_test();
        let ptr = unsafe { corvid_alloc_object(32) };
        assert!(!ptr.is_null());
        unsafe { corvid_free_object(ptr) };
    }

    #[test]
    fn alloc_vec_writes_length_prefix() {
        let _guard = serialize_test();
        let ptr = unsafe { corvid_alloc_vec(4) };
        assert!(!ptr.is_null());
        let length = unsafe { *(ptr.sub(8) as *const u64) };
        assert_eq!(length, 4);
        unsafe { corvid_free_vec(ptr) };
    }

    #[test]
    fn alloc_list_returns_empty_header() {
        let _guard = serialize_test();
        let header = unsafe { corvid_alloc_list() };
        assert!(!header.is_null());
        assert_eq!(unsafe { (*header).length }, 0);
        unsafe { corvid_free_list(header) };
    }

    #[test]
    fn retained_object_survives_scope_exit() {
        let _guard = serialize_test();
        unsafe {
            corvid_set_samm_enabled(1);
            corvid_enter_scope();
            corvid_enter_scope();
            let ptr = corvid_alloc_object_retained(16, 1);
            corvid_exit_scope();
            corvid_wait_for_samm();
            // Retained one level up, so it is still owned by the outer
            // scope and freeing it directly must succeed (not double-free).
            corvid_free_object(ptr);
            corvid_exit_scope();
            corvid_wait_for_samm();
        }
    }

    #[test]
    fn is_samm_enabled_reflects_set_samm_enabled() {
        let _guard = serialize_test();
        unsafe {
            corvid_set_samm_enabled(0);
            assert_eq!(corvid_is_samm_enabled(), 0);
            corvid_set_samm_enabled(1);
            assert_eq!(corvid_is_samm_enabled(), 1);
        }
    }
}
