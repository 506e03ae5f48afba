//! Reading and writing the length-prefixed UTF-32 string payload layout
//! shared by `corvid-heap`'s tracked heap and string pool (§3 "String
//! payload").

use std::ptr::NonNull;

/// The code-point count stored in the 8-byte length prefix immediately
/// before `payload`.
pub fn string_len(payload: NonNull<u8>) -> usize {
    unsafe { (payload.as_ptr().sub(8) as *const u64).read() as usize }
}

/// Borrow `payload`'s code points as a slice, using the length prefix at
/// `payload - 8` to determine how many `u32` slots to expose.
///
/// # Safety
/// `payload` must be a live string payload allocated by `corvid-heap`
/// (either through the string pool or the tracked heap's direct string
/// allocator), and must not be mutated for the lifetime of the returned
/// slice.
pub unsafe fn string_chars<'a>(payload: NonNull<u8>) -> &'a [u32] {
    let len = string_len(payload);
    std::slice::from_raw_parts(payload.as_ptr() as *const u32, len)
}

/// Mutably borrow `payload`'s code points, same length rule as
/// [`string_chars`].
///
/// # Safety
/// Same requirements as [`string_chars`], plus exclusive access.
pub unsafe fn string_chars_mut<'a>(payload: NonNull<u8>) -> &'a mut [u32] {
    let len = string_len(payload);
    std::slice::from_raw_parts_mut(payload.as_ptr() as *mut u32, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_heap::{copy_bytes_as_utf32, StringPool};

    #[test]
    fn string_len_and_chars_reflect_the_written_length() {
        let pool = StringPool::default();
        let payload = pool.alloc_chars(3).unwrap();
        unsafe {
            copy_bytes_as_utf32(string_chars_mut(payload), b"abc");
            assert_eq!(string_len(payload), 3);
            assert_eq!(string_chars(payload), &[97u32, 98, 99]);
            pool.free_chars(payload);
        }
    }
}
