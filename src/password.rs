//! Salted PBKDF2-HMAC-SHA1 password hashing for principals.
//!
//! Hash and salt are both stored as standard base64. Verification re-derives
//! the key from the stored salt and compares the encodings in constant time.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

pub const HASH_ITERATIONS: u32 = 4096;
pub const HASH_KEY_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

/// Hash a password under a freshly generated random salt.
pub fn hash_password(password: impl AsRef<[u8]>) -> PasswordHash {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    PasswordHash {
        hash: hash_password_with_salt(password.as_ref(), &salt),
        salt: STANDARD.encode(salt),
    }
}

/// Derive the base64 hash of `password` under a raw salt.
pub fn hash_password_with_salt(password: &[u8], salt: &[u8]) -> String {
    let mut key = [0u8; HASH_KEY_LENGTH];
    pbkdf2_hmac::<Sha1>(password, salt, HASH_ITERATIONS, &mut key);
    STANDARD.encode(key)
}

/// Check `password` against a stored hash/salt pair.
///
/// A salt that is not valid base64 is an error, not a mismatch: it means the
/// stored record is broken, not that the client sent the wrong password.
pub fn verify_password(
    password: impl AsRef<[u8]>,
    stored_hash: &str,
    stored_salt: &str,
) -> Result<bool> {
    let salt = STANDARD
        .decode(stored_salt)
        .map_err(|e| AppError::Credential(format!("stored salt is not valid base64: {}", e)))?;

    let derived = hash_password_with_salt(password.as_ref(), &salt);
    Ok(derived.as_bytes().ct_eq(stored_hash.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_password_shapes() {
        let hashed = hash_password("secret");
        assert_eq!(STANDARD.decode(&hashed.hash).unwrap().len(), HASH_KEY_LENGTH);
        assert_eq!(STANDARD.decode(&hashed.salt).unwrap().len(), SALT_LENGTH);
    }

    #[test]
    fn test_salts_are_fresh() {
        let first = hash_password("secret");
        let second = hash_password("secret");
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn test_known_vector() {
        // RFC 6070 test vector, truncated key length differs so compare prefix.
        let mut key = [0u8; 20];
        pbkdf2_hmac::<Sha1>(b"password", b"salt", 4096, &mut key);
        let full = STANDARD.decode(hash_password_with_salt(b"password", b"salt")).unwrap();
        assert_eq!(&full[..20], &key);
        assert_eq!(
            key,
            [
                0x4b, 0x00, 0x79, 0x01, 0xb7, 0x65, 0x48, 0x9a, 0xbe, 0xad, 0x49, 0xd9, 0x26, 0xf7,
                0x21, 0xd0, 0x65, 0xa4, 0x29, 0xc1
            ]
        );
    }

    #[test]
    fn test_verify_is_deterministic() {
        let hashed = hash_password("admin");
        for _ in 0..3 {
            assert!(verify_password("admin", &hashed.hash, &hashed.salt).unwrap());
            assert!(!verify_password("Admin", &hashed.hash, &hashed.salt).unwrap());
        }
    }

    #[test]
    fn test_verify_rejects_malformed_salt() {
        let hashed = hash_password("admin");
        let err = verify_password("admin", &hashed.hash, "not base64!").unwrap_err();
        assert!(matches!(err, AppError::Credential(_)));
    }

    #[test]
    fn test_verify_with_malformed_hash_is_mismatch() {
        let hashed = hash_password("admin");
        assert!(!verify_password("admin", "garbage", &hashed.salt).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_hash_then_verify_round_trips(
            password in prop::collection::vec(any::<u8>(), 0..24),
            other in prop::collection::vec(any::<u8>(), 0..24),
        ) {
            let hashed = hash_password(&password);
            prop_assert!(verify_password(&password, &hashed.hash, &hashed.salt).unwrap());
            if other != password {
                prop_assert!(!verify_password(&other, &hashed.hash, &hashed.salt).unwrap());
            }
        }
    }
}
