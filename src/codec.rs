//! Reversible byte↔decimal-digit stream codec (component A).
//!
//! Every log payload and every gene's on-the-wire representation passes
//! through here: three ASCII decimal digits per byte, most-significant
//! digit first.

use crate::error::CodecError;

/// `3 * n` — how many digits encoding `n` bytes produces.
#[must_use]
pub const fn digits_for_text_len(n: usize) -> usize {
    3 * n
}

/// `m / 3` — how many bytes `m` digits decode to, rounding down.
#[must_use]
pub const fn bytes_for_digit_len(m: usize) -> usize {
    m / 3
}

/// Encodes `bytes` as a sequence of decimal digits, three per byte,
/// most-significant digit first. Fails if `capacity` cannot hold the
/// result.
pub fn encode(bytes: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
    let needed = digits_for_text_len(bytes.len());
    if needed > capacity {
        return Err(CodecError::CapacityExceeded { needed, capacity });
    }
    let mut digits = Vec::with_capacity(needed);
    for &b in bytes {
        digits.push(b / 100);
        digits.push((b / 10) % 10);
        digits.push(b % 10);
    }
    Ok(digits)
}

/// Encodes `bytes` with no capacity bound (used where the caller already
/// knows the destination has room, e.g. a fixed 400-byte log payload that
/// is validated separately).
pub fn encode_unbounded(bytes: &[u8]) -> Vec<u8> {
    let mut digits = Vec::with_capacity(digits_for_text_len(bytes.len()));
    for &b in bytes {
        digits.push(b / 100);
        digits.push((b / 10) % 10);
        digits.push(b % 10);
    }
    digits
}

/// Decodes a digit sequence back into bytes. Every element of `digits` must
/// be in `[0, 9]` and the length must be a multiple of three; a triple that
/// evaluates to more than 255 is a `ByteOverflow`.
pub fn decode(digits: &[u8]) -> Result<Vec<u8>, CodecError> {
    if digits.len() % 3 != 0 {
        return Err(CodecError::NotMultipleOfThree(digits.len()));
    }
    let mut bytes = Vec::with_capacity(bytes_for_digit_len(digits.len()));
    for (i, triple) in digits.chunks_exact(3).enumerate() {
        for (j, &d) in triple.iter().enumerate() {
            if d > 9 {
                return Err(CodecError::InvalidDigit {
                    offset: i * 3 + j,
                    value: d,
                });
            }
        }
        let value = u32::from(triple[0]) * 100 + u32::from(triple[1]) * 10 + u32::from(triple[2]);
        if value > 255 {
            return Err(CodecError::ByteOverflow {
                offset: i * 3,
                value,
            });
        }
        bytes.push(value as u8);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_known_bytes() {
        let bytes = b"payload".to_vec();
        let digits = encode(&bytes, 4096).unwrap();
        assert_eq!(digits.len(), bytes.len() * 3);
        assert_eq!(decode(&digits).unwrap(), bytes);
    }

    #[test]
    fn encode_rejects_when_over_capacity() {
        let bytes = vec![0u8; 10];
        assert_eq!(
            encode(&bytes, 29).unwrap_err(),
            CodecError::CapacityExceeded {
                needed: 30,
                capacity: 29
            }
        );
    }

    #[test]
    fn decode_rejects_bad_length() {
        assert!(matches!(
            decode(&[1, 2]),
            Err(CodecError::NotMultipleOfThree(2))
        ));
    }

    #[test]
    fn decode_rejects_invalid_digit() {
        assert!(matches!(
            decode(&[0, 1, 10]),
            Err(CodecError::InvalidDigit { offset: 2, value: 10 })
        ));
    }

    #[test]
    fn decode_rejects_byte_overflow() {
        assert!(matches!(
            decode(&[9, 9, 9]),
            Err(CodecError::ByteOverflow { offset: 0, value: 999 })
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let digits = encode(&bytes, digits_for_text_len(bytes.len())).unwrap();
            prop_assert_eq!(decode(&digits).unwrap(), bytes);
        }

        #[test]
        fn prop_round_trip_digits(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            // Any valid digit sequence (every triple < 256) round-trips the other way.
            let digits = encode_unbounded(&bytes);
            let bytes_back = decode(&digits).unwrap();
            let digits_back = encode_unbounded(&bytes_back);
            prop_assert_eq!(digits, digits_back);
        }
    }
}
