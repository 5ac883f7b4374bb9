//! Password hashing
//!
//! Argon2id with the crate's default parameters and a fresh salt per hash.
//! Hashes are stored in PHC string form.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use uuid::Uuid;

const TEMPORARY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";
const TEMPORARY_LENGTH: usize = 12;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to hash password")?;

    Ok(hash.to_string())
}

/// Check `password` against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only a malformed hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Stored password hash is malformed")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("{}", e)).context("Password verification failed"),
    }
}

/// Random password mailed to a user who asked for a reset.
///
/// Ambiguous glyphs (0/O, 1/l/I) are left out of the alphabet.
pub fn generate_temporary_password() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes
        .iter()
        .take(TEMPORARY_LENGTH)
        .map(|b| TEMPORARY_ALPHABET[*b as usize % TEMPORARY_ALPHABET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_and_salted() {
        let first = hash_password("hunter22").expect("Failed to hash password");
        let second = hash_password("hunter22").expect("Failed to hash password");

        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(!first.contains("hunter22"));
    }

    #[test]
    fn test_verify_matches_only_the_original() {
        let hash = hash_password("correct horse").expect("Failed to hash password");

        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("correct horse ", &hash).unwrap());
        assert!(!verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("secret", "plaintext-from-an-old-import").is_err());
    }

    #[test]
    fn test_temporary_password_shape() {
        let a = generate_temporary_password();
        let b = generate_temporary_password();

        assert_eq!(a.len(), TEMPORARY_LENGTH);
        assert!(a.bytes().all(|c| TEMPORARY_ALPHABET.contains(&c)));
        assert_ne!(a, b);

        let hash = hash_password(&a).unwrap();
        assert!(verify_password(&a, &hash).unwrap());
    }
}
