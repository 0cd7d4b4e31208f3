//! Canonical CBOR encoder.
//!
//! Deterministic encoding per RFC 8949 §4.2.1, restricted to the shapes a
//! [`Value`] can take.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// CBOR major types used by [`Value`].
#[derive(Clone, Copy)]
#[repr(u8)]
enum Major {
    Unsigned = 0,
    Negative = 1,
    Text = 3,
    Array = 4,
    Map = 5,
}

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;

/// Encodes a value to canonical CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DuplicateKey`] if a map repeats a key.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Streams canonical CBOR into an owned buffer.
///
/// Several values can be written back to back; the result is a CBOR
/// sequence.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    out: Vec<u8>,
}

impl CanonicalEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DuplicateKey`] if a map repeats a key. The
    /// buffer may hold a partial value afterwards.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.out.push(NULL),
            Value::Bool(flag) => self.out.push(if *flag { TRUE } else { FALSE }),
            Value::Integer(n) => self.integer(*n),
            Value::Text(text) => self.text(text),
            Value::Array(items) => {
                self.head(Major::Array, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Map(entries) => self.map(entries)?,
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    fn integer(&mut self, n: i64) {
        match u64::try_from(n) {
            Ok(unsigned) => self.head(Major::Unsigned, unsigned),
            // -1 - n never overflows and is non-negative for negative n
            Err(_) => self.head(Major::Negative, (-1 - n).unsigned_abs()),
        }
    }

    fn text(&mut self, text: &str) {
        self.head(Major::Text, text.len() as u64);
        self.out.extend_from_slice(text.as_bytes());
    }

    /// Writes a major type with its argument in the shortest form.
    fn head(&mut self, major: Major, arg: u64) {
        let tag = (major as u8) << 5;
        if arg < 24 {
            self.out.push(tag | arg as u8);
        } else if let Ok(small) = u8::try_from(arg) {
            self.out.extend_from_slice(&[tag | 24, small]);
        } else if let Ok(short) = u16::try_from(arg) {
            self.out.push(tag | 25);
            self.out.extend_from_slice(&short.to_be_bytes());
        } else if let Ok(word) = u32::try_from(arg) {
            self.out.push(tag | 26);
            self.out.extend_from_slice(&word.to_be_bytes());
        } else {
            self.out.push(tag | 27);
            self.out.extend_from_slice(&arg.to_be_bytes());
        }
    }

    fn map(&mut self, entries: &[(String, Value)]) -> CodecResult<()> {
        let mut keyed: Vec<(Vec<u8>, &(String, Value))> = entries
            .iter()
            .map(|entry| {
                let mut key = CanonicalEncoder::new();
                key.text(&entry.0);
                (key.into_bytes(), entry)
            })
            .collect();
        keyed.sort_unstable_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        if let Some(dup) = keyed.windows(2).find(|w| w[0].0 == w[1].0) {
            let (name, _) = dup[0].1;
            return Err(CodecError::duplicate_key(name.as_str()));
        }

        self.head(Major::Map, keyed.len() as u64);
        for (key, (_, value)) in keyed {
            self.out.extend_from_slice(&key);
            self.encode(value)?;
        }
        Ok(())
    }
}
