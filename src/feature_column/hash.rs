//! Stable 64-bit fingerprints for hash buckets and feature crosses.
//!
//! FNV-1a is used so bucket assignments are identical across runs, platforms
//! and checkpoint reloads.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fingerprint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Bucket of a categorical string value.
pub fn string_bucket(value: &str, buckets: usize) -> usize {
    (fingerprint(value.as_bytes()) % buckets as u64) as usize
}

/// Bucket of one crossed tuple of ids. Position matters: `(a, b)` and `(b, a)`
/// land in different buckets.
pub fn cross_bucket(ids: &[usize], buckets: usize) -> usize {
    let mut bytes = Vec::with_capacity(ids.len() * 16);
    for (position, &id) in ids.iter().enumerate() {
        bytes.extend_from_slice(&(position as u64).to_le_bytes());
        bytes.extend_from_slice(&(id as u64).to_le_bytes());
    }
    (fingerprint(&bytes) % buckets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fingerprint(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fingerprint(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fingerprint(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_string_bucket_in_range() {
        for value in ["english", "IT", "US", "GB", ""] {
            assert!(string_bucket(value, 5) < 5);
        }
        assert_eq!(string_bucket("english", 100), string_bucket("english", 100));
    }

    #[test]
    fn test_cross_bucket_is_order_sensitive() {
        let forward = cross_bucket(&[1, 2], 1_000_003);
        let backward = cross_bucket(&[2, 1], 1_000_003);
        assert_ne!(forward, backward);
    }
}
