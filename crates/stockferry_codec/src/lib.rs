//! # stockferry codec
//!
//! Canonical CBOR encoding for stockferry records.
//!
//! Integrity checksums are computed over bytes produced by this crate, so
//! identical logical content must always yield identical bytes:
//! - Maps are sorted by key (length-first, then bytewise on the encoded key)
//! - Integers use the shortest encoding
//! - No floats, no indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use stockferry_codec::{to_canonical_cbor, Value};
//!
//! let a = Value::map([("name", "pallet-7"), ("notes", "fragile")]);
//! let b = Value::map([("notes", "fragile"), ("name", "pallet-7")]);
//! assert_eq!(to_canonical_cbor(&a).unwrap(), to_canonical_cbor(&b).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoder;
mod error;
mod value;

pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Types that have a canonical value form.
pub trait Canonical {
    /// Lowers `self` into a [`Value`].
    fn to_value(&self) -> Value;

    /// Encodes `self` to canonical CBOR bytes.
    fn canonical_bytes(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&self.to_value())
    }
}

impl Canonical for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: Canonical> Canonical for [T] {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(Canonical::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn shuffled_maps_encode_identically(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            seed in any::<u64>(),
        ) {
            let pairs: Vec<(String, i64)> = entries.into_iter().collect();
            let mut shuffled = pairs.clone();
            // deterministic rotation stands in for a shuffle
            if !shuffled.is_empty() {
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                shuffled.reverse();
            }

            let a = to_canonical_cbor(&Value::map(pairs)).unwrap();
            let b = to_canonical_cbor(&Value::map(shuffled)).unwrap();
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn slice_is_array() {
        let items = vec![Value::from(1), Value::from(2)];
        assert_eq!(
            items.as_slice().canonical_bytes().unwrap(),
            vec![0x82, 0x01, 0x02]
        );
    }
}
