//! Compact tagged value encoding for query processing.
//!
//! [`Id`] is a 64-bit tagged union: the high 4 bits select a [`Datatype`]
//! tag, the low 60 bits carry the payload. Tags are ordered so that the raw
//! `u64` ordering equals the "compare by datatype, then by payload" rule
//! used for mixed-type comparisons.
//!
//! **Ordering semantics:** within a single tag the `u64` ordering is the
//! domain ordering (ints use offset-binary, doubles use a sign-flip
//! transform, vocabulary ids are assigned in lexicographic order by the
//! index builder). Across tags, values group by datatype.
//!
//! The all-zero bit pattern is `Id::UNDEFINED`; bitwise OR of any id with
//! `UNDEFINED` yields that id unchanged, which the aggregate evaluator
//! exploits for MIN/MAX absorption.

use std::cmp::Ordering;
use std::fmt;

/// Datatype tag stored in the high 4 bits of an [`Id`].
///
/// `Undefined` must be tag zero so that `Id::UNDEFINED` is the all-zero
/// bit pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Datatype {
    /// Unbound / absent value. Sorts before everything.
    Undefined = 0,
    /// Signed integer, i60 offset-binary payload.
    Int = 1,
    /// 64-bit float truncated to its upper 60 bits, order-preserving.
    Double = 2,
    /// Index into the global (or local) vocabulary.
    VocabIndex = 3,
    /// Index into the text-record space.
    TextIndex = 4,
    /// Boolean, payload 0 or 1.
    Bool = 5,
    /// Days since the Unix epoch, i60 offset-binary payload.
    Date = 6,
}

const TAG_SHIFT: u32 = 60;
const PAYLOAD_MASK: u64 = (1u64 << TAG_SHIFT) - 1;

/// Offset for i60 offset-binary encoding: 2^59.
const I60_OFFSET: u64 = 1u64 << 59;
/// Maximum representable i60 value: 2^59 - 1.
const I60_MAX: i64 = (1i64 << 59) - 1;
/// Minimum representable i60 value: -2^59.
const I60_MIN: i64 = -(1i64 << 59);

/// Payload bit marking a vocabulary id as local to one result (not part of
/// the global index vocabulary).
const LOCAL_VOCAB_BIT: u64 = 1u64 << 59;

/// A 64-bit tagged value.
///
/// Layout: `[tag: 4 bits][payload: 60 bits]`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Id(u64);

impl Id {
    /// The unbound value; all bits zero.
    pub const UNDEFINED: Self = Self(0);

    /// Smallest id of any datatype (equals `UNDEFINED`).
    pub const MIN: Self = Self(0);

    /// Largest possible id.
    pub const MAX: Self = Self(u64::MAX);

    // ---- Constructors ----

    /// Encode a signed integer.
    ///
    /// Values outside the i60 range [-2^59, 2^59-1] are clamped; the query
    /// layer never produces counts that large.
    #[inline]
    pub fn from_int(value: i64) -> Self {
        let clamped = value.clamp(I60_MIN, I60_MAX);
        let payload = (clamped as u64).wrapping_add(I60_OFFSET) & PAYLOAD_MASK;
        Self(((Datatype::Int as u64) << TAG_SHIFT) | payload)
    }

    /// Encode a double, keeping the upper 60 bits of an order-preserving
    /// transform of the IEEE-754 pattern (4 mantissa bits are dropped).
    #[inline]
    pub fn from_double(value: f64) -> Self {
        let bits = value.to_bits();
        // Sign-flip transform: negative values flip all bits, positive
        // values flip the sign bit. Makes the u64 ordering numeric.
        let ordered = if bits & (1u64 << 63) != 0 {
            !bits
        } else {
            bits | (1u64 << 63)
        };
        Self(((Datatype::Double as u64) << TAG_SHIFT) | (ordered >> 4))
    }

    /// Encode a global vocabulary index.
    #[inline]
    pub fn from_vocab(index: u64) -> Self {
        debug_assert!(index < LOCAL_VOCAB_BIT);
        Self(((Datatype::VocabIndex as u64) << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    /// Encode a vocabulary index local to a single result table.
    #[inline]
    pub fn from_local_vocab(index: u64) -> Self {
        Self(((Datatype::VocabIndex as u64) << TAG_SHIFT) | LOCAL_VOCAB_BIT | (index & PAYLOAD_MASK))
    }

    /// Encode a text-record index.
    #[inline]
    pub fn from_text(index: u64) -> Self {
        Self(((Datatype::TextIndex as u64) << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    /// Encode a boolean.
    #[inline]
    pub fn from_bool(value: bool) -> Self {
        Self(((Datatype::Bool as u64) << TAG_SHIFT) | value as u64)
    }

    /// Encode a date as days since the Unix epoch.
    #[inline]
    pub fn from_date_days(days: i64) -> Self {
        let payload = (days as u64).wrapping_add(I60_OFFSET) & PAYLOAD_MASK;
        Self(((Datatype::Date as u64) << TAG_SHIFT) | payload)
    }

    /// Reconstruct an id from its raw bit pattern.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    // ---- Accessors ----

    /// The raw bit pattern.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The datatype tag.
    #[inline]
    pub fn datatype(self) -> Datatype {
        match self.0 >> TAG_SHIFT {
            0 => Datatype::Undefined,
            1 => Datatype::Int,
            2 => Datatype::Double,
            3 => Datatype::VocabIndex,
            4 => Datatype::TextIndex,
            5 => Datatype::Bool,
            _ => Datatype::Date,
        }
    }

    /// True if this is the unbound value.
    #[inline]
    pub fn is_undefined(self) -> bool {
        self.datatype() == Datatype::Undefined
    }

    /// The raw 60-bit payload.
    #[inline]
    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Decode an integer payload. `None` if the tag is not `Int`.
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        match self.datatype() {
            Datatype::Int => Some(self.payload().wrapping_sub(I60_OFFSET) as i64),
            _ => None,
        }
    }

    /// Decode a double payload. `None` if the tag is not `Double`.
    #[inline]
    pub fn as_double(self) -> Option<f64> {
        match self.datatype() {
            Datatype::Double => {
                let ordered = self.payload() << 4;
                let bits = if ordered & (1u64 << 63) != 0 {
                    ordered & !(1u64 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            _ => None,
        }
    }

    /// Decode a boolean payload. `None` if the tag is not `Bool`.
    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self.datatype() {
            Datatype::Bool => Some(self.payload() != 0),
            _ => None,
        }
    }

    /// Decode a vocabulary index (global or local). `None` for other tags.
    #[inline]
    pub fn vocab_index(self) -> Option<u64> {
        match self.datatype() {
            Datatype::VocabIndex => Some(self.payload() & !LOCAL_VOCAB_BIT),
            _ => None,
        }
    }

    /// True if this id addresses a result-local vocabulary.
    #[inline]
    pub fn is_local_vocab(self) -> bool {
        self.datatype() == Datatype::VocabIndex && self.payload() & LOCAL_VOCAB_BIT != 0
    }

    /// Decode a date payload as days since the epoch.
    #[inline]
    pub fn as_date_days(self) -> Option<i64> {
        match self.datatype() {
            Datatype::Date => Some(self.payload().wrapping_sub(I60_OFFSET) as i64),
            _ => None,
        }
    }

    /// Mixed-type comparison: by datatype tag first, then by payload.
    ///
    /// Because the tag occupies the high bits this is exactly the raw
    /// `u64` ordering; the named function documents the intent at call
    /// sites that rely on the rule.
    #[inline]
    pub fn compare_by_type(self, other: Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datatype() {
            Datatype::Undefined => write!(f, "Id(undef)"),
            Datatype::Int => write!(f, "Id(int {})", self.as_int().unwrap()),
            Datatype::Double => write!(f, "Id(double {})", self.as_double().unwrap()),
            Datatype::VocabIndex => {
                if self.is_local_vocab() {
                    write!(f, "Id(local-vocab {})", self.vocab_index().unwrap())
                } else {
                    write!(f, "Id(vocab {})", self.vocab_index().unwrap())
                }
            }
            Datatype::TextIndex => write!(f, "Id(text {})", self.payload()),
            Datatype::Bool => write!(f, "Id(bool {})", self.payload() != 0),
            Datatype::Date => write!(f, "Id(date {})", self.as_date_days().unwrap()),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datatype() {
            Datatype::Undefined => write!(f, "UNDEF"),
            Datatype::Int => write!(f, "{}", self.as_int().unwrap()),
            Datatype::Double => write!(f, "{}", self.as_double().unwrap()),
            Datatype::Bool => write!(f, "{}", self.payload() != 0),
            _ => write!(f, "#{:x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_is_all_zeros() {
        assert_eq!(Id::UNDEFINED.bits(), 0);
        assert_eq!(Id::UNDEFINED.datatype(), Datatype::Undefined);
    }

    #[test]
    fn test_undefined_bit_or_is_identity() {
        for id in [
            Id::from_int(-5),
            Id::from_double(2.5),
            Id::from_vocab(42),
            Id::from_bool(true),
        ] {
            let merged = Id::from_bits(id.bits() | Id::UNDEFINED.bits());
            assert_eq!(merged, id);
        }
    }

    #[test]
    fn test_int_round_trip_and_order() {
        let values = [-1_000_000i64, -1, 0, 1, 7, 1_000_000];
        let mut prev: Option<Id> = None;
        for v in values {
            let id = Id::from_int(v);
            assert_eq!(id.as_int(), Some(v));
            if let Some(p) = prev {
                assert!(p < id);
            }
            prev = Some(id);
        }
    }

    #[test]
    fn test_double_order() {
        let values = [-10.5f64, -0.25, 0.0, 0.25, 3.5, 1e9];
        let mut prev: Option<Id> = None;
        for v in values {
            let id = Id::from_double(v);
            assert_eq!(id.as_double(), Some(v));
            if let Some(p) = prev {
                assert!(p < id, "{:?} < {:?}", p, id);
            }
            prev = Some(id);
        }
    }

    #[test]
    fn test_compare_by_type_groups_by_tag() {
        let int = Id::from_int(999);
        let double = Id::from_double(-999.0);
        let vocab = Id::from_vocab(0);
        assert_eq!(int.compare_by_type(double), Ordering::Less);
        assert_eq!(double.compare_by_type(vocab), Ordering::Less);
        assert_eq!(Id::UNDEFINED.compare_by_type(int), Ordering::Less);
    }

    #[test]
    fn test_local_vocab_flag() {
        let global = Id::from_vocab(7);
        let local = Id::from_local_vocab(7);
        assert!(!global.is_local_vocab());
        assert!(local.is_local_vocab());
        assert_eq!(global.vocab_index(), Some(7));
        assert_eq!(local.vocab_index(), Some(7));
        assert_ne!(global, local);
    }

    #[test]
    fn test_date_round_trip() {
        let id = Id::from_date_days(-365);
        assert_eq!(id.as_date_days(), Some(-365));
        assert!(Id::from_date_days(-1) < Id::from_date_days(1));
    }
}
