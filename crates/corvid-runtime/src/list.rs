//! List constructors, copies, reversal, map, and filter (§4.F).

use std::ptr::NonNull;
use std::sync::Arc;

use corvid_sdk::AtomTag;
use corvid_heap::{copy_bytes_as_utf32, Freelist, RawAtom, RawListHeader, StringPool, TrackedHeap};

use crate::payload::{string_chars, string_len};

/// A façade over a shared tracked heap, freelist, and string pool that
/// implements the list/string operations (§4.F). Construct one per
/// runtime instance and share it (typically behind an `Arc`) across every
/// mutator thread.
pub struct ListEngine {
    pub(crate) heap: Arc<TrackedHeap>,
    pub(crate) freelist: Arc<Freelist>,
    pub(crate) string_pool: Arc<StringPool>,
}

impl ListEngine {
    /// Build an engine sharing the given tracked heap, freelist, and
    /// string pool.
    pub fn new(heap: Arc<TrackedHeap>, freelist: Arc<Freelist>, string_pool: Arc<StringPool>) -> ListEngine {
        ListEngine {
            heap,
            freelist,
            string_pool,
        }
    }

    /// `list_create_empty`: a header whose head/tail are null and length
    /// is 0.
    pub fn list_create_empty(&self) -> NonNull<RawListHeader> {
        self.heap.alloc_list()
    }

    fn splice_tail(&self, list: NonNull<RawListHeader>, atom: NonNull<RawAtom>) {
        unsafe {
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

    fn new_atom(&self, tag: AtomTag, payload: u64) -> NonNull<RawAtom> {
        let atom = self.freelist.atoms.get();
        unsafe {
            atom.as_ptr().write(RawAtom {
                tag: tag as u64,
                payload,
                next: 0,
            });
        }
        atom
    }

    /// Append an `ATOM_INT` atom at the tail, O(1).
    pub fn append_int(&self, list: NonNull<RawListHeader>, value: i64) {
        let atom = self.new_atom(AtomTag::Int, value as u64);
        self.splice_tail(list, atom);
    }

    /// Append an `ATOM_FLOAT` atom at the tail, O(1).
    pub fn append_float(&self, list: NonNull<RawListHeader>, value: f64) {
        let atom = self.new_atom(AtomTag::Float, value.to_bits());
        self.splice_tail(list, atom);
    }

    /// Append an `ATOM_STRING` atom at the tail, widening `chars` into a
    /// freshly allocated pooled payload. Returns `false` (and posts no
    /// error of its own — the allocator already did) if the payload could
    /// not be allocated.
    pub fn append_string(&self, list: NonNull<RawListHeader>, chars: &[u8]) -> bool {
        let Some(payload) = self.heap.alloc_string_payload(chars.len()) else {
            return false;
        };
        unsafe {
            let dest = std::slice::from_raw_parts_mut(payload.as_ptr() as *mut u32, chars.len());
            copy_bytes_as_utf32(dest, chars);
        }
        let atom = self.new_atom(AtomTag::String, payload.as_ptr() as u64);
        self.splice_tail(list, atom);
        true
    }

    /// Append an `ATOM_LIST` atom at the tail, O(1). `nested` must already
    /// be registered with the tracked heap (e.g. via
    /// [`ListEngine::list_create_empty`]).
    pub fn append_list(&self, list: NonNull<RawListHeader>, nested: NonNull<RawListHeader>) {
        let atom = self.new_atom(AtomTag::List, nested.as_ptr() as u64);
        self.splice_tail(list, atom);
    }

    /// Append an `ATOM_OBJECT` atom at the tail, O(1). `object` must
    /// already be registered with the tracked heap.
    pub fn append_object(&self, list: NonNull<RawListHeader>, object: NonNull<u8>) {
        let atom = self.new_atom(AtomTag::Object, object.as_ptr() as u64);
        self.splice_tail(list, atom);
    }

    /// `concat(a, b)`: splices `b.head` onto `a.tail` destructively, O(1);
    /// `b` becomes an empty shell.
    pub fn concat(&self, a: NonNull<RawListHeader>, b: NonNull<RawListHeader>) {
        unsafe {
            let (a, b) = (a.as_ptr(), b.as_ptr());
            if (*b).head == 0 {
                return;
            }
            if (*a).tail != 0 {
                (*((*a).tail as *mut RawAtom)).next = (*b).head;
            } else {
                (*a).head = (*b).head;
            }
            (*a).tail = (*b).tail;
            (*a).length += (*b).length;
            (*b).head = 0;
            (*b).tail = 0;
            (*b).length = 0;
        }
    }

    /// Duplicate an atom's payload according to its tag: scalars are
    /// copied by value; `STRING` payloads are duplicated through the
    /// string pool; `LIST` payloads are deep-copied recursively.
    fn deep_copy_atom_payload(&self, tag: AtomTag, payload: u64) -> u64 {
        match tag {
            AtomTag::String => {
                let src = unsafe { NonNull::new_unchecked(payload as *mut u8) };
                let len = string_len(src);
                let dest = self
                    .heap
                    .alloc_string_payload(len)
                    .expect("string payload allocation failed during deep copy");
                unsafe {
                    let src_chars = string_chars(src);
                    let dest_chars =
                        std::slice::from_raw_parts_mut(dest.as_ptr() as *mut u32, len);
                    dest_chars.copy_from_slice(src_chars);
                }
                dest.as_ptr() as u64
            }
            AtomTag::List => {
                let src = unsafe { NonNull::new_unchecked(payload as *mut RawListHeader) };
                self.deep_copy(src).as_ptr() as u64
            }
            _ => payload,
        }
    }

    /// Deep copy: for each atom, allocate a new atom of the same tag and
    /// payload; `STRING` payloads are duplicated through the string pool;
    /// `LIST` payloads recurse. No cell or payload is shared between
    /// source and copy.
    pub fn deep_copy(&self, list: NonNull<RawListHeader>) -> NonNull<RawListHeader> {
        let dest = self.list_create_empty();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let src_atom = cursor as *const RawAtom;
            let (tag_raw, payload, next) =
                unsafe { ((*src_atom).tag, (*src_atom).payload, (*src_atom).next) };
            let tag = AtomTag::from_u64(tag_raw).expect("live atom must carry a valid tag");
            let new_payload = self.deep_copy_atom_payload(tag, payload);
            let atom = self.new_atom(tag, new_payload);
            self.splice_tail(dest, atom);
            cursor = next;
        }
        dest
    }

    /// Shallow copy: duplicate header and atoms but share `STRING`/`LIST`
    /// payloads verbatim.
    pub fn shallow_copy(&self, list: NonNull<RawListHeader>) -> NonNull<RawListHeader> {
        let dest = self.list_create_empty();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let src_atom = cursor as *const RawAtom;
            let (tag_raw, payload, next) =
                unsafe { ((*src_atom).tag, (*src_atom).payload, (*src_atom).next) };
            let tag = AtomTag::from_u64(tag_raw).expect("live atom must carry a valid tag");
            let atom = self.new_atom(tag, payload);
            self.splice_tail(dest, atom);
            cursor = next;
        }
        dest
    }

    /// `deep_copy_literal_list`: like [`ListEngine::deep_copy`] but the
    /// source is a borrowed, compact, read-only sequence of
    /// `(tag, payload)` pairs produced ahead of time (e.g. by constant
    /// folding) rather than a live, freelist-backed chain.
    pub fn deep_copy_literal_list(&self, literal: &[(AtomTag, u64)]) -> NonNull<RawListHeader> {
        let dest = self.list_create_empty();
        for &(tag, payload) in literal {
            let new_payload = self.deep_copy_atom_payload(tag, payload);
            let atom = self.new_atom(tag, new_payload);
            self.splice_tail(dest, atom);
        }
        dest
    }

    /// Reverse a list's atom chain in place, O(n).
    pub fn reverse(&self, list: NonNull<RawListHeader>) {
        unsafe {
            let header = list.as_ptr();
            let old_head = (*header).head;
            let old_tail = (*header).tail;
            let mut prev: u64 = 0;
            let mut cursor = old_head;
            while cursor != 0 {
                let atom = cursor as *mut RawAtom;
                let next = (*atom).next;
                (*atom).next = prev;
                prev = cursor;
                cursor = next;
            }
            (*header).head = if old_head == 0 { 0 } else { old_tail };
            (*header).tail = if old_head == 0 { 0 } else { old_head };
            let _ = prev; // prev now equals old_tail by construction.
        }
    }

    /// Map (float): allocate a new list; for each `ATOM_FLOAT` input,
    /// apply `f`; non-float atoms are copied unchanged (payload shared,
    /// as for [`ListEngine::shallow_copy`]).
    pub fn map_float(&self, list: NonNull<RawListHeader>, f: extern "C" fn(f64) -> f64) -> NonNull<RawListHeader> {
        let dest = self.list_create_empty();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let src_atom = cursor as *const RawAtom;
            let (tag_raw, payload, next) =
                unsafe { ((*src_atom).tag, (*src_atom).payload, (*src_atom).next) };
            let tag = AtomTag::from_u64(tag_raw).expect("live atom must carry a valid tag");
            let new_payload = if tag == AtomTag::Float {
                f(f64::from_bits(payload)).to_bits()
            } else {
                payload
            };
            let atom = self.new_atom(tag, new_payload);
            self.splice_tail(dest, atom);
            cursor = next;
        }
        dest
    }

    /// Filter: a new list containing only the atoms for which
    /// `predicate(tag, payload)` returns nonzero.
    pub fn filter(
        &self,
        list: NonNull<RawListHeader>,
        predicate: extern "C" fn(u64, u64) -> i32,
    ) -> NonNull<RawListHeader> {
        let dest = self.list_create_empty();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let src_atom = cursor as *const RawAtom;
            let (tag_raw, payload, next) =
                unsafe { ((*src_atom).tag, (*src_atom).payload, (*src_atom).next) };
            if predicate(tag_raw, payload) != 0 {
                let tag = AtomTag::from_u64(tag_raw).expect("live atom must carry a valid tag");
                let atom = self.new_atom(tag, payload);
                self.splice_tail(dest, atom);
            }
            cursor = next;
        }
        dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_heap::HeapConfig;

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

    fn atom_tags(engine: &ListEngine, list: NonNull<RawListHeader>) -> Vec<AtomTag> {
        let mut tags = Vec::new();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let atom = cursor as *const RawAtom;
            tags.push(AtomTag::from_u64(unsafe { (*atom).tag }).unwrap());
            cursor = unsafe { (*atom).next };
        }
        let _ = engine;
        tags
    }

    #[test]
    fn append_int_grows_length_and_links_tail() {
        let engine = engine();
        let list = engine.list_create_empty();
        engine.append_int(list, 1);
        engine.append_int(list, 2);
        unsafe {
            assert_eq!((*list.as_ptr()).length, 2);
        }
        assert_eq!(atom_tags(&engine, list), vec![AtomTag::Int, AtomTag::Int]);
    }

    #[test]
    fn concat_splices_b_onto_a_and_empties_b() {
        let engine = engine();
        let a = engine.list_create_empty();
        let b = engine.list_create_empty();
        engine.append_int(a, 1);
        engine.append_int(b, 2);
        engine.append_int(b, 3);
        engine.concat(a, b);
        unsafe {
            assert_eq!((*a.as_ptr()).length, 3);
            assert_eq!((*b.as_ptr()).length, 0);
            assert_eq!((*b.as_ptr()).head, 0);
        }
    }

    #[test]
    fn reverse_flips_the_chain() {
        let engine = engine();
        let list = engine.list_create_empty();
        engine.append_int(list, 1);
        engine.append_int(list, 2);
        engine.append_int(list, 3);
        engine.reverse(list);
        let mut values = Vec::new();
        let mut cursor = unsafe { (*list.as_ptr()).head };
        while cursor != 0 {
            let atom = cursor as *const RawAtom;
            values.push(unsafe { (*atom).payload } as i64);
            cursor = unsafe { (*atom).next };
        }
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn deep_copy_duplicates_string_payloads() {
        let engine = engine();
        let list = engine.list_create_empty();
        assert!(engine.append_string(list, b"hi"));
        let copy = engine.deep_copy(list);
        let src_payload = unsafe { (*((*list.as_ptr()).head as *const RawAtom)).payload };
        let dest_payload = unsafe { (*((*copy.as_ptr()).head as *const RawAtom)).payload };
        assert_ne!(src_payload, dest_payload);
        unsafe {
            let src = NonNull::new_unchecked(src_payload as *mut u8);
            let dest = NonNull::new_unchecked(dest_payload as *mut u8);
            assert_eq!(string_chars(src), string_chars(dest));
        }
    }

    #[test]
    fn shallow_copy_shares_string_payload_pointer() {
        let engine = engine();
        let list = engine.list_create_empty();
        assert!(engine.append_string(list, b"hi"));
        let copy = engine.shallow_copy(list);
        let src_payload = unsafe { (*((*list.as_ptr()).head as *const RawAtom)).payload };
        let dest_payload = unsafe { (*((*copy.as_ptr()).head as *const RawAtom)).payload };
        assert_eq!(src_payload, dest_payload);
    }

    extern "C" fn double(x: f64) -> f64 {
        x * 2.0
    }

    #[test]
    fn map_float_applies_function_only_to_float_atoms() {
        let engine = engine();
        let list = engine.list_create_empty();
        engine.append_float(list, 2.0);
        engine.append_int(list, 5);
        let mapped = engine.map_float(list, double);
        let mut cursor = unsafe { (*mapped.as_ptr()).head };
        let first = cursor as *const RawAtom;
        assert_eq!(f64::from_bits(unsafe { (*first).payload }), 4.0);
        cursor = unsafe { (*first).next };
        let second = cursor as *const RawAtom;
        assert_eq!(unsafe { (*second).payload } as i64, 5);
    }

    extern "C" fn keep_ints(tag: u64, _payload: u64) -> i32 {
        (tag == AtomTag::Int as u64) as i32
    }

    #[test]
    fn filter_keeps_only_matching_atoms() {
        let engine = engine();
        let list = engine.list_create_empty();
        engine.append_int(list, 1);
        engine.append_float(list, 2.0);
        engine.append_int(list, 3);
        let filtered = engine.filter(list, keep_ints);
        unsafe {
            assert_eq!((*filtered.as_ptr()).length, 2);
        }
        assert_eq!(
            atom_tags(&engine, filtered),
            vec![AtomTag::Int, AtomTag::Int]
        );
    }
}
