//! Shared tagged-value primitives (§3 "List atom", §3 "List header").
//!
//! `corvid-runtime` and `corvid-heap` both need the same small vocabulary of
//! atom tags — one to build list cells, the other to decide how a freed
//! cell routes back to its reclaimer. Keeping the tag enum here avoids a
//! dependency edge between those two crates.

/// The tag half of a list atom's 8-byte tag field. `#[repr(u64)]` so the
/// enum's bit pattern matches what emitted AArch64 code writes directly
/// into an atom's tag word.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomTag {
    /// 64-bit integer payload.
    Int = 0,
    /// 64-bit float payload (IEEE 754 bit pattern).
    Float = 1,
    /// Pointer to a string-pool payload.
    String = 2,
    /// Pointer to another list's header.
    List = 3,
    /// Pointer to a heap object.
    Object = 4,
    /// Marks a list header rather than a value-carrying atom.
    Sentinel = 5,
}

impl AtomTag {
    /// Decode a tag word written by emitted code. `None` for any value
    /// outside the fixed set of tags above.
    pub fn from_u64(raw: u64) -> Option<AtomTag> {
        match raw {
            0 => Some(AtomTag::Int),
            1 => Some(AtomTag::Float),
            2 => Some(AtomTag::String),
            3 => Some(AtomTag::List),
            4 => Some(AtomTag::Object),
            5 => Some(AtomTag::Sentinel),
            _ => None,
        }
    }

    /// True for tags whose payload is a pointer into some other allocation
    /// (as opposed to an inline scalar).
    pub fn is_pointer_payload(self) -> bool {
        matches!(self, AtomTag::String | AtomTag::List | AtomTag::Object)
    }
}

/// An atom's 8-byte payload, reinterpreted according to its tag. This is a
/// thin, `Copy` convenience wrapper — callers still consult [`AtomTag`] to
/// know which accessor is meaningful.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct AtomPayload(u64);

impl AtomPayload {
    /// Wrap a raw 64-bit payload word.
    pub const fn from_bits(bits: u64) -> Self {
        AtomPayload(bits)
    }

    /// The raw 64-bit payload word.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Interpret the payload as a signed 64-bit integer.
    pub const fn as_int(self) -> i64 {
        self.0 as i64
    }

    /// Interpret the payload as an IEEE 754 double.
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Interpret the payload as a raw pointer address. Callers are
    /// responsible for knowing, via the atom's [`AtomTag`], what the
    /// pointer addresses (string pool payload, list header, or object).
    pub const fn as_pointer_bits(self) -> usize {
        self.0 as usize
    }

    /// Build a payload word from a signed integer.
    pub const fn from_int(value: i64) -> Self {
        AtomPayload(value as u64)
    }

    /// Build a payload word from an IEEE 754 double.
    pub fn from_float(value: f64) -> Self {
        AtomPayload(value.to_bits())
    }

    /// Build a payload word from a pointer address.
    pub const fn from_pointer_bits(addr: usize) -> Self {
        AtomPayload(addr as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_through_u64() {
        for tag in [
            AtomTag::Int,
            AtomTag::Float,
            AtomTag::String,
            AtomTag::List,
            AtomTag::Object,
            AtomTag::Sentinel,
        ] {
            let raw = tag as u64;
            assert_eq!(AtomTag::from_u64(raw), Some(tag));
        }
    }

    #[test]
    fn unknown_tag_value_is_none() {
        assert_eq!(AtomTag::from_u64(6), None);
        assert_eq!(AtomTag::from_u64(u64::MAX), None);
    }

    #[test]
    fn pointer_payload_classification() {
        assert!(!AtomTag::Int.is_pointer_payload());
        assert!(!AtomTag::Float.is_pointer_payload());
        assert!(AtomTag::String.is_pointer_payload());
        assert!(AtomTag::List.is_pointer_payload());
        assert!(AtomTag::Object.is_pointer_payload());
    }

    #[test]
    fn payload_int_round_trip() {
        let payload = AtomPayload::from_int(-42);
        assert_eq!(payload.as_int(), -42);
    }

    #[test]
    fn payload_float_round_trip() {
        let payload = AtomPayload::from_float(3.5);
        assert!((payload.as_float() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn payload_pointer_round_trip() {
        let payload = AtomPayload::from_pointer_bits(0x7fff_0000);
        assert_eq!(payload.as_pointer_bits(), 0x7fff_0000);
    }
}
