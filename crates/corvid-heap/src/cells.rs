//! Raw list-cell layouts (§3 "List atom", "List header").
//!
//! These are the fixed-size POD records the freelist allocator pools.
//! They live in `corvid-heap` rather than `corvid-runtime` because the
//! freelist (§4.B) and the tracked heap's list-kind dispatch (§4.D) both
//! need to know their exact size and layout; `corvid-runtime` builds the
//! higher-level list operations (append, concat, copy, ...) on top of
//! pointers to these records.

use corvid_sdk::AtomTag;

/// Tag value a [`RawListHeader`] carries in its `tag` field, distinguishing
/// it from an ordinary atom when the two share a pool or an address space
/// (§3 "List header": "Sentinel record: tag (marks header), ...").
pub const ATOM_TAG_SENTINEL: u64 = AtomTag::Sentinel as u64;

/// One list cell: an 8-byte tag, an 8-byte payload, and an 8-byte `next`
/// pointer. `sizeof(RawAtom)` is uniform regardless of payload type — the
/// union is expressed as a plain `u64` payload rather than a Rust `enum`,
/// matching the "tagged union" data-model note in §3 and the "implement as
/// a tagged enum of fixed-size variants" guidance in §9 (the enum lives one
/// layer up, in `corvid-runtime`; this is the wire layout it serializes
/// to/from).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAtom {
    /// `AtomTag` as a raw `u64`, so emitted AArch64 code can write it
    /// directly into the tag word.
    pub tag: u64,
    /// The 64-bit payload: a signed integer, an IEEE-754 bit pattern, or a
    /// pointer, depending on `tag`.
    pub payload: u64,
    /// Intrusive freelist / list-chain link. `0` means "no next".
    pub next: u64,
}

impl RawAtom {
    /// A zeroed atom, as a freshly-popped freelist slot is before the
    /// caller writes its tag and payload.
    pub const ZERO: RawAtom = RawAtom {
        tag: 0,
        payload: 0,
        next: 0,
    };
}

/// The sentinel record naming a list: tag, `contains_literals` flag,
/// length, head pointer, tail pointer (§3 "List header").
///
/// Invariant (§3): a header *owns* every atom reachable from `head`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawListHeader {
    /// Always [`ATOM_TAG_SENTINEL`] for a live header.
    pub tag: u64,
    /// Set for lists materialized from a compact literal layout
    /// (§4.F "Literal materialization").
    pub contains_literals: bool,
    /// Number of atoms reachable from `head`.
    pub length: u64,
    /// First atom, or `0` for an empty list.
    pub head: u64,
    /// Last atom, or `0` for an empty list.
    pub tail: u64,
}

impl RawListHeader {
    /// A header for a brand-new, empty list (`list_create_empty`, §4.F).
    pub const EMPTY: RawListHeader = RawListHeader {
        tag: ATOM_TAG_SENTINEL,
        contains_literals: false,
        length: 0,
        head: 0,
        tail: 0,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_atom_is_fixed_size_regardless_of_payload() {
        assert_eq!(std::mem::size_of::<RawAtom>(), 24);
    }

    #[test]
    fn empty_header_has_zero_length_and_null_ends() {
        let header = RawListHeader::EMPTY;
        assert_eq!(header.length, 0);
        assert_eq!(header.head, 0);
        assert_eq!(header.tail, 0);
        assert_eq!(header.tag, ATOM_TAG_SENTINEL);
    }
}
