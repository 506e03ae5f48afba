//! `split`/`join` over UTF-32 string payloads (§4.F).

use std::ptr::NonNull;

use corvid_heap::{copy_bytes_as_utf32, RawAtom, RawListHeader};
use corvid_sdk::AtomTag;

use crate::list::ListEngine;
use crate::payload::string_chars;

impl ListEngine {
    /// Tokenize UTF-32 string `s` by UTF-32 delimiter `d` and return a
    /// list of new string atoms. `d = None` means an empty delimiter,
    /// which splits into single code points.
    pub fn split(&self, s: NonNull<u8>, d: Option<u32>) -> NonNull<RawListHeader> {
        let chars = unsafe { string_chars(s) };
        let dest = self.list_create_empty();

        match d {
            None => {
                for &ch in chars {
                    self.append_code_points(dest, &[ch]);
                }
            }
            Some(delimiter) => {
                let mut start = 0;
                for (i, &ch) in chars.iter().enumerate() {
                    if ch == delimiter {
                        self.append_code_points(dest, &chars[start..i]);
                        start = i + 1;
                    }
                }
                self.append_code_points(dest, &chars[start..]);
            }
        }
        dest
    }

    /// Concatenate `STRING` atoms of `list` separated by `d`; non-`STRING`
    /// atoms are skipped.
    pub fn join(&self, list: NonNull<RawListHeader>, d: u32) -> Option<NonNull<u8>> {
        let mut pieces: Vec<&[u32]> = Vec::new();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let atom = cursor as *const RawAtom;
            let (tag_raw, payload, next) =
                unsafe { ((*atom).tag, (*atom).payload, (*atom).next) };
            if AtomTag::from_u64(tag_raw) == Some(AtomTag::String) {
                let payload = unsafe { NonNull::new_unchecked(payload as *mut u8) };
                pieces.push(unsafe { string_chars(payload) });
            }
            cursor = next;
        }

        let total_len: usize = pieces.iter().map(|p| p.len()).sum::<usize>()
            + pieces.len().saturating_sub(1);
        let dest = self.heap.alloc_string_payload(total_len)?;
        unsafe {
            let out = std::slice::from_raw_parts_mut(dest.as_ptr() as *mut u32, total_len);
            let mut pos = 0;
            for (i, piece) in pieces.iter().enumerate() {
                if i > 0 {
                    out[pos] = d;
                    pos += 1;
                }
                out[pos..pos + piece.len()].copy_from_slice(piece);
                pos += piece.len();
            }
        }
        Some(dest)
    }

    fn append_code_points(&self, list: NonNull<RawListHeader>, code_points: &[u32]) {
        let Some(payload) = self.heap.alloc_string_payload(code_points.len()) else {
            return;
        };
        unsafe {
            let dest = std::slice::from_raw_parts_mut(payload.as_ptr() as *mut u32, code_points.len());
            dest.copy_from_slice(code_points);
        }
        let atom = self.freelist.atoms.get();
        unsafe {
            atom.as_ptr().write(RawAtom {
                tag: AtomTag::String as u64,
                payload: payload.as_ptr() as u64,
                next: 0,
            });
            let header = list.as_ptr();
            if (*header).tail != 0 {
                (*((*header).tail as *mut RawAtom)).next = atom.as_ptr() as u64;
            } else {
                (*header).head = atom.as_ptr() as u64;
            }
            (*header).tail = atom.as_ptr() as u64;
            (*header).length += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_heap::{Freelist, HeapConfig, StringPool, TrackedHeap};
    use std::sync::Arc;

    fn engine() -> ListEngine {
        let freelist = Arc::new(Freelist::default());
        let string_pool = Arc::new(StringPool::default());
        let heap = Arc::new(TrackedHeap::new(
            HeapConfig::default(),
            Arc::clone(&freelist),
            Arc::clone(&string_pool),
        ));
        ListEngine::new(heap, freelist, string_pool)
    }

    fn make_string(engine: &ListEngine, text: &str) -> NonNull<u8> {
        let payload = engine.heap.alloc_string_payload(text.len()).unwrap();
        unsafe {
            let dest = std::slice::from_raw_parts_mut(payload.as_ptr() as *mut u32, text.len());
            copy_bytes_as_utf32(dest, text.as_bytes());
        }
        payload
    }

    fn payload_to_string(payload: NonNull<u8>) -> String {
        unsafe {
            string_chars(payload)
                .iter()
                .map(|&c| char::from_u32(c).unwrap())
                .collect()
        }
    }

    #[test]
    fn split_then_join_round_trips() {
        let engine = engine();
        let s = make_string(&engine, "a,bb,ccc");
        let list = engine.split(s, Some(b',' as u32));
        unsafe {
            assert_eq!((*list.as_ptr()).length, 3);
        }
        let joined = engine.join(list, b',' as u32).unwrap();
        assert_eq!(payload_to_string(joined), "a,bb,ccc");
    }

    #[test]
    fn empty_delimiter_splits_into_code_points() {
        let engine = engine();
        let s = make_string(&engine, "abc");
        let list = engine.split(s, None);
        unsafe {
            assert_eq!((*list.as_ptr()).length, 3);
        }
    }

    #[test]
    fn join_skips_non_string_atoms() {
        let engine = engine();
        let list = engine.list_create_empty();
        assert!(engine.append_string(list, b"a"));
        engine.append_int(list, 42);
        assert!(engine.append_string(list, b"b"));
        let joined = engine.join(list, b'-' as u32).unwrap();
        assert_eq!(payload_to_string(joined), "a-b");
    }
}
