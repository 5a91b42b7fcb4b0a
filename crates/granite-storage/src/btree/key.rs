//! Key trait for the on-disk indexes.
//!
//! Index pages store keys as fixed-width byte strings; this trait supplies
//! the width and the codec. Comparison happens on decoded values, so the
//! encoding does not need to be order-preserving.

use std::fmt::Debug;

/// A fixed-width, orderable key storable in index pages.
pub trait IndexKey: Ord + Clone + Debug + Send + Sync + 'static {
    /// Serialized size in bytes.
    const ENCODED_LEN: usize;

    /// Encodes the key into `buf`, which is exactly `ENCODED_LEN` bytes.
    fn encode_into(&self, buf: &mut [u8]);

    /// Decodes a key from `buf`, which is exactly `ENCODED_LEN` bytes.
    fn decode_from(buf: &[u8]) -> Self;
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf.try_into().unwrap())
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        i64::from_le_bytes(buf.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_roundtrip() {
        let mut buf = [0u8; 8];
        42u64.encode_into(&mut buf);
        assert_eq!(u64::decode_from(&buf), 42);
    }

    #[test]
    fn test_i64_roundtrip_negative() {
        let mut buf = [0u8; 8];
        (-7i64).encode_into(&mut buf);
        assert_eq!(i64::decode_from(&buf), -7);
    }
}
