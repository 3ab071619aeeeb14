use anyhow::Result;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{Error, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::Secret;

pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    // Only panics for invalid hash parameters
    #[allow(clippy::unwrap_used)]
    argon2
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

pub fn parse_hash(hash: &str) -> Result<PasswordHash<'_>, Error> {
    PasswordHash::new(hash)
}

pub fn verify_password_hash(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = parse_hash(hash).map_err(|e| anyhow::anyhow!(e))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

pub fn generate_token_secret() -> Secret<String> {
    Secret::random()
}

pub fn sha256_hex(input: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(input.as_bytes()))
}

/// SHA-256 digest of a token as lowercase hex. Only this value is persisted.
pub fn token_digest(token: &str) -> String {
    sha256_hex(token)
}

/// First 16 hex characters of a digest, for log output.
pub fn truncate_digest(digest: &str) -> String {
    let prefix: String = digest.chars().take(16).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_digest_is_hex_sha256() {
        let digest = token_digest("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_token_secret_format() {
        let secret = generate_token_secret();
        let value = secret.expose_secret();
        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_truncate_digest() {
        let digest = token_digest("abc");
        let truncated = truncate_digest(&digest);
        assert_eq!(truncated, "ba7816bf8f01cfea...");
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("hunter2");
        assert!(verify_password_hash("hunter2", &hash).unwrap());
        assert!(!verify_password_hash("hunter3", &hash).unwrap());
    }
}
