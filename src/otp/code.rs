//! Passcode generation and hashing.

use rand::{Rng, rngs::OsRng};
use sha2::{Digest, Sha256};

pub const CODE_LENGTH: usize = 6;

/// Draw a uniformly random numeric code from the OS CSPRNG.
#[must_use]
pub fn generate_code() -> String {
    let upper = 10_u32.pow(u32::try_from(CODE_LENGTH).unwrap_or(6));
    let value = OsRng.gen_range(0..upper);
    format!("{value:0width$}", width = CODE_LENGTH)
}

/// Hash a code so the raw value never reaches storage.
#[must_use]
pub fn hash_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hasher.finalize().to_vec()
}

/// Submitted codes must be exactly `CODE_LENGTH` ASCII digits.
#[must_use]
pub fn well_formed(code: &str) -> bool {
    let code = code.trim();
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_fixed_length_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(well_formed(&code), "unexpected code {code}");
        }
    }

    #[test]
    fn hash_code_stable_and_trims() {
        assert_eq!(hash_code("012345"), hash_code(" 012345 "));
        assert_ne!(hash_code("012345"), hash_code("012346"));
    }

    #[test]
    fn well_formed_rejects_other_shapes() {
        assert!(!well_formed("12345"));
        assert!(!well_formed("1234567"));
        assert!(!well_formed("12a456"));
        assert!(well_formed("000000"));
    }
}
