//! Canonical encoding for cross-platform reproducibility.
//!
//! The canonical form of a [`Metadata`] tree is plain UTF-8 text with an
//! explicit type marker in front of every value:
//!
//! ```text
//! map    := 'M' <count> ':' (string value)*     entries sorted by key bytes
//! list   := 'L' <count> ':' value*               order preserved
//! string := 'S' <byte-len> ':' <utf8 bytes>
//! number := 'N' ('+'|'-') <digits>['.'<digits>] ';'
//! bool   := 'T' | 'F'
//! ```
//!
//! Numbers are written as the shortest decimal that round-trips, with an
//! explicit sign and no exponent, so `1`, `1.0` and `1.00` all encode as
//! `N+1;` while the string `"1"` encodes as `S1:1`.
//!
//! Because the output is valid UTF-8, the byte `0xFF` can never occur in it.
//! The content digest is `BLAKE3(metadata || 0xFF || content)`.

use crate::error::EncodingError;
use crate::hash::CanonicalDigest;
use crate::metadata::{join_path, MetaValue, Metadata};

/// Separator between the canonical metadata and the raw content
pub const DELIMITER: u8 = 0xFF;

const BOM: char = '\u{FEFF}';

/// Canonical encoder for evidence metadata
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    out: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest of `(metadata, content)`
    ///
    /// # Errors
    ///
    /// Returns error if the metadata holds a value with no canonical form
    pub fn encode(metadata: &Metadata, content: &[u8]) -> Result<CanonicalDigest, EncodingError> {
        let canonical = Self::encode_metadata(metadata)?;
        Ok(Self::digest_encoded(&canonical, content))
    }

    /// Canonical bytes of a metadata tree
    ///
    /// # Errors
    ///
    /// Returns error if the metadata holds a value with no canonical form
    pub fn encode_metadata(metadata: &Metadata) -> Result<Vec<u8>, EncodingError> {
        let mut encoder = Self::new();
        encoder.write_map(metadata, "")?;
        Ok(encoder.into_inner())
    }

    /// Digest of already canonical metadata bytes and content
    #[must_use]
    pub fn digest_encoded(canonical_metadata: &[u8], content: &[u8]) -> CanonicalDigest {
        CanonicalDigest::compute_parts(&[canonical_metadata, &[DELIMITER], content])
    }

    /// Consume and return the encoded bytes
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.out
    }

    fn write_value(&mut self, value: &MetaValue, path: &str) -> Result<(), EncodingError> {
        match value {
            MetaValue::String(s) => self.write_str(s, path),
            MetaValue::Integer(i) => {
                self.write_number(*i < 0, &i.unsigned_abs().to_string());
                Ok(())
            }
            MetaValue::Float(f) => {
                if !f.is_finite() {
                    return Err(EncodingError::NonFiniteNumber {
                        path: path.to_string(),
                    });
                }
                // -0.0 is the same number as 0
                let negative = *f < 0.0;
                self.write_number(negative, &format!("{}", f.abs()));
                Ok(())
            }
            MetaValue::Bool(b) => {
                self.out.push(if *b { b'T' } else { b'F' });
                Ok(())
            }
            MetaValue::List(items) => {
                self.write_header(b'L', items.len());
                for (i, item) in items.iter().enumerate() {
                    self.write_value(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            MetaValue::Map(nested) => self.write_map(nested, path),
            MetaValue::Bytes(_) => Err(EncodingError::UnsupportedValue {
                path: path.to_string(),
                kind: value.kind(),
            }),
        }
    }

    fn write_map(&mut self, metadata: &Metadata, path: &str) -> Result<(), EncodingError> {
        self.write_header(b'M', metadata.len());
        // BTreeMap<String, _> iterates in byte order of the keys
        for (key, value) in metadata.iter() {
            let child = join_path(path, key);
            self.write_str(key, &child)?;
            self.write_value(value, &child)?;
        }
        Ok(())
    }

    fn write_str(&mut self, s: &str, path: &str) -> Result<(), EncodingError> {
        if s.starts_with(BOM) {
            return Err(EncodingError::ByteOrderMark {
                path: path.to_string(),
            });
        }
        self.write_header(b'S', s.len());
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_number(&mut self, negative: bool, magnitude: &str) {
        let negative = negative && magnitude.bytes().any(|b| b != b'0' && b != b'.');
        self.out.push(b'N');
        self.out.push(if negative { b'-' } else { b'+' });
        self.out.extend_from_slice(magnitude.as_bytes());
        self.out.push(b';');
    }

    fn write_header(&mut self, marker: u8, len: usize) {
        self.out.push(marker);
        self.out.extend_from_slice(len.to_string().as_bytes());
        self.out.push(b':');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded(metadata: &Metadata) -> String {
        String::from_utf8(CanonicalEncoder::encode_metadata(metadata).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let metadata = Metadata::new()
            .with("b", "x")
            .with("a", 1i64)
            .with("c", Metadata::new().with("z", true).with("y", vec![1i64, -2]));
        assert_eq!(encoded(&metadata), "M3:S1:aN+1;S1:bS1:xS1:cM2:S1:yL2:N+1;N-2;S1:zT");
    }

    #[test]
    fn test_string_and_number_do_not_collide() {
        let as_string = Metadata::new().with("v", "1");
        let as_number = Metadata::new().with("v", 1i64);
        assert_ne!(
            CanonicalEncoder::encode(&as_string, b"").unwrap(),
            CanonicalEncoder::encode(&as_number, b"").unwrap()
        );
    }

    #[test]
    fn test_number_normalization() {
        let cases: Vec<(MetaValue, &str)> = vec![
            (MetaValue::Float(1.0), "N+1;"),
            (MetaValue::Integer(1), "N+1;"),
            (MetaValue::Float(-0.0), "N+0;"),
            (MetaValue::Float(2.50), "N+2.5;"),
            (MetaValue::Float(-0.125), "N-0.125;"),
            (MetaValue::Float(1e21), "N+1000000000000000000000;"),
            (MetaValue::Integer(-42), "N-42;"),
        ];
        for (value, expected) in cases {
            let metadata = Metadata::new().with("n", value);
            assert_eq!(encoded(&metadata), format!("M1:S1:n{expected}"));
        }
    }

    #[test]
    fn test_rejects_bytes() {
        let metadata = Metadata::new().with("dev", Metadata::new().with("blob", MetaValue::Bytes(vec![1, 2])));
        let err = CanonicalEncoder::encode(&metadata, b"content").unwrap_err();
        assert_eq!(
            err,
            EncodingError::UnsupportedValue {
                path: "dev.blob".to_string(),
                kind: "bytes"
            }
        );
    }

    #[test]
    fn test_rejects_non_finite() {
        let metadata = Metadata::new().with("list", vec![MetaValue::Float(f64::NAN)]);
        let err = CanonicalEncoder::encode(&metadata, b"").unwrap_err();
        assert_eq!(err, EncodingError::NonFiniteNumber { path: "list[0]".to_string() });
    }

    #[test]
    fn test_rejects_bom() {
        let metadata = Metadata::new().with("note", "\u{FEFF}hello");
        assert!(matches!(
            CanonicalEncoder::encode(&metadata, b""),
            Err(EncodingError::ByteOrderMark { .. })
        ));
    }

    #[test]
    fn test_unicode_keys_sorted_by_bytes() {
        let metadata = Metadata::new().with("é", 1i64).with("z", 2i64);
        // 'z' (0x7A) sorts before 'é' (0xC3 0xA9)
        assert!(encoded(&metadata).starts_with("M2:S1:z"));
    }

    #[test]
    fn test_delimiter_separates_segments() {
        // Moving bytes between the two segments must change the digest
        let a = CanonicalEncoder::digest_encoded(b"M0:", b"S1:x");
        let b = CanonicalEncoder::digest_encoded(b"M0:S1:x", b"");
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_bit_content_change() {
        let metadata = Metadata::new().with("k", "v");
        let original = CanonicalEncoder::encode(&metadata, &[0b0000_0000]).unwrap();
        let flipped = CanonicalEncoder::encode(&metadata, &[0b0000_0001]).unwrap();
        assert_ne!(original, flipped);
    }

    #[test]
    fn test_known_vector_is_stable() {
        let metadata = Metadata::new().with("a", 1i64);
        let digest = CanonicalEncoder::encode(&metadata, b"content").unwrap();
        let expected = CanonicalDigest::compute(b"M1:S1:aN+1;\xffcontent");
        assert_eq!(digest, expected);
    }

    proptest! {
        #[test]
        fn prop_insertion_order_irrelevant(
            entries in proptest::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..16),
            content in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let forward: Metadata = entries.iter().cloned().collect();
            let backward: Metadata = entries.iter().rev().cloned().collect();
            // later duplicates win in each direction; only compare when keys are unique
            let mut keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
            keys.sort();
            keys.dedup();
            prop_assume!(keys.len() == entries.len());
            prop_assert_eq!(
                CanonicalEncoder::encode(&forward, &content).unwrap(),
                CanonicalEncoder::encode(&backward, &content).unwrap()
            );
        }

        #[test]
        fn prop_output_never_contains_delimiter(
            text in "\\PC*",
            number in any::<f64>().prop_filter("finite", |f| f.is_finite()),
        ) {
            let metadata = Metadata::new().with("text", text.clone()).with(text, number);
            let bytes = CanonicalEncoder::encode_metadata(&metadata);
            if let Ok(bytes) = bytes {
                prop_assert!(!bytes.contains(&DELIMITER));
            }
        }
    }
}
