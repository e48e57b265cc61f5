//! Deterministic CBOR (RFC 8949 section 4.2.1).
//!
//! Key requests are signed and then parsed by independent key servers, so
//! both sides must agree on a single byte form: shortest-form heads,
//! definite lengths, map entries ordered by encoded key and no floats.

use ciborium::value::Value;

use crate::error::{CoreError, Result};

/// Integer map key.
pub fn key(k: u64) -> Value {
    Value::Integer(k.into())
}

/// Encode `value` in deterministic form.
pub fn canonical_cbor(value: &Value) -> Result<Vec<u8>> {
    let mut out = Writer(Vec::new());
    out.value(value)?;
    Ok(out.0)
}

/// Parse bytes that must already be canonical.
///
/// The value is re-encoded and compared, so a request signed in one form
/// cannot be presented in another.
pub fn decode_canonical(bytes: &[u8]) -> Result<Value> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    if canonical_cbor(&value)? != bytes {
        return Err(CoreError::DecodingError("input is not canonical CBOR".into()));
    }
    Ok(value)
}

const UNSIGNED: u8 = 0;
const NEGATIVE: u8 = 1;
const BYTES: u8 = 2;
const TEXT: u8 = 3;
const ARRAY: u8 = 4;
const MAP: u8 = 5;

struct Writer(Vec<u8>);

impl Writer {
    fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Integer(i) => {
                let n = i128::from(*i);
                match u64::try_from(n) {
                    Ok(unsigned) => self.head(UNSIGNED, unsigned),
                    // -1 - n fits in u64 for every ciborium integer.
                    Err(_) => self.head(NEGATIVE, (-1 - n) as u64),
                }
            }
            Value::Bytes(b) => self.chunk(BYTES, b),
            Value::Text(t) => self.chunk(TEXT, t.as_bytes()),
            Value::Array(items) => {
                self.head(ARRAY, items.len() as u64);
                for item in items {
                    self.value(item)?;
                }
            }
            Value::Map(entries) => self.map(entries)?,
            Value::Bool(false) => self.0.push(0xf4),
            Value::Bool(true) => self.0.push(0xf5),
            Value::Null => self.0.push(0xf6),
            Value::Float(_) => {
                return Err(CoreError::EncodingError(
                    "floats have no canonical form here".into(),
                ))
            }
            other => {
                return Err(CoreError::EncodingError(format!(
                    "unsupported CBOR value: {other:?}"
                )))
            }
        }
        Ok(())
    }

    /// Initial byte plus the shortest argument that holds `arg`.
    fn head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        let be = arg.to_be_bytes();
        let (info, width) = match arg {
            0..=23 => (arg as u8, 0),
            24..=0xff => (24, 1),
            0x100..=0xffff => (25, 2),
            0x1_0000..=0xffff_ffff => (26, 4),
            _ => (27, 8),
        };
        self.0.push(major | info);
        self.0.extend_from_slice(&be[8 - width..]);
    }

    fn chunk(&mut self, major: u8, data: &[u8]) {
        self.head(major, data.len() as u64);
        self.0.extend_from_slice(data);
    }

    /// Entries are ordered by the bytewise order of their encoded keys.
    fn map(&mut self, entries: &[(Value, Value)]) -> Result<()> {
        let mut sorted = entries
            .iter()
            .map(|(k, v)| canonical_cbor(k).map(|encoded| (encoded, v)))
            .collect::<Result<Vec<_>>>()?;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        if sorted.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(CoreError::EncodingError("duplicate map key".into()));
        }

        self.head(MAP, sorted.len() as u64);
        for (encoded_key, v) in sorted {
            self.0.extend_from_slice(&encoded_key);
            self.value(v)?;
        }
        Ok(())
    }
}

/// Read-side helper over a CBOR map with integer keys.
pub struct CborMap<'a> {
    entries: &'a [(Value, Value)],
}

impl<'a> CborMap<'a> {
    /// View a value as a map.
    pub fn new(value: &'a Value, what: &str) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            _ => Err(CoreError::DecodingError(format!("{what}: expected map"))),
        }
    }

    /// Look up an integer key.
    pub fn get(&self, k: u64) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(key, _)| matches!(key, Value::Integer(i) if i128::from(*i) == k as i128))
            .map(|(_, v)| v)
    }

    fn require(&self, k: u64, name: &str) -> Result<&'a Value> {
        self.get(k)
            .ok_or_else(|| CoreError::DecodingError(format!("missing field {name}")))
    }

    pub fn bytes(&self, k: u64, name: &str) -> Result<&'a [u8]> {
        match self.require(k, name)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(CoreError::DecodingError(format!("{name}: expected bytes"))),
        }
    }

    /// Bytes of an exact length.
    pub fn fixed<const N: usize>(&self, k: u64, name: &str) -> Result<[u8; N]> {
        let b = self.bytes(k, name)?;
        b.try_into().map_err(|_| {
            CoreError::DecodingError(format!("{name}: expected {N} bytes, got {}", b.len()))
        })
    }

    pub fn uint(&self, k: u64, name: &str) -> Result<u64> {
        match self.require(k, name)? {
            Value::Integer(i) => u64::try_from(i128::from(*i))
                .map_err(|_| CoreError::DecodingError(format!("{name}: out of range"))),
            _ => Err(CoreError::DecodingError(format!("{name}: expected integer"))),
        }
    }

    pub fn int(&self, k: u64, name: &str) -> Result<i64> {
        match self.require(k, name)? {
            Value::Integer(i) => i64::try_from(i128::from(*i))
                .map_err(|_| CoreError::DecodingError(format!("{name}: out of range"))),
            _ => Err(CoreError::DecodingError(format!("{name}: expected integer"))),
        }
    }

    pub fn array(&self, k: u64, name: &str) -> Result<&'a [Value]> {
        match self.require(k, name)? {
            Value::Array(a) => Ok(a),
            _ => Err(CoreError::DecodingError(format!("{name}: expected array"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keys_sorted_regardless_of_input_order() {
        let a = Value::Map(vec![(key(2), Value::Null), (key(0), Value::Bool(true))]);
        let b = Value::Map(vec![(key(0), Value::Bool(true)), (key(2), Value::Null)]);
        assert_eq!(canonical_cbor(&a).unwrap(), canonical_cbor(&b).unwrap());
    }

    #[test]
    fn test_smallest_integer_encoding() {
        assert_eq!(canonical_cbor(&key(23)).unwrap(), vec![0x17]);
        assert_eq!(canonical_cbor(&key(24)).unwrap(), vec![0x18, 24]);
        assert_eq!(canonical_cbor(&key(256)).unwrap(), vec![0x19, 0x01, 0x00]);
        let neg = Value::Integer((-1i64).into());
        assert_eq!(canonical_cbor(&neg).unwrap(), vec![0x20]);
    }

    #[test]
    fn test_wide_heads() {
        assert_eq!(canonical_cbor(&key(0x1_0000)).unwrap(), vec![0x1a, 0, 1, 0, 0]);
        assert_eq!(
            canonical_cbor(&key(u64::MAX)).unwrap(),
            [vec![0x1b], vec![0xff; 8]].concat()
        );
        let text = Value::Text("x".repeat(30));
        assert_eq!(&canonical_cbor(&text).unwrap()[..2], &[0x78, 30]);
    }

    #[test]
    fn test_floats_rejected() {
        assert!(canonical_cbor(&Value::Float(1.5)).is_err());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let v = Value::Map(vec![(key(1), Value::Null), (key(1), Value::Null)]);
        assert!(canonical_cbor(&v).is_err());
    }

    #[test]
    fn test_decode_canonical_rejects_non_canonical() {
        let v = Value::Map(vec![
            (key(0), Value::Bytes(vec![1, 2, 3])),
            (key(1), Value::Integer(500.into())),
        ]);
        let bytes = canonical_cbor(&v).unwrap();
        let decoded = decode_canonical(&bytes).unwrap();
        let map = CborMap::new(&decoded, "test").unwrap();
        assert_eq!(map.bytes(0, "a").unwrap(), &[1, 2, 3]);
        assert_eq!(map.uint(1, "b").unwrap(), 500);
        assert!(map.fixed::<4>(0, "a").is_err());

        // 500 written with an 8-byte argument instead of 2.
        let mut loose = vec![0xa2, 0x00, 0x43, 1, 2, 3, 0x01, 0x1b];
        loose.extend_from_slice(&500u64.to_be_bytes());
        assert!(decode_canonical(&loose).is_err());
    }
}
