//! Low-level cryptographic operations.
//!
//! This module and `keys` are the only places that touch cipher or RNG
//! primitives directly. Everything else encrypts and decrypts through the
//! envelope codec.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM with a detached 128-bit tag
//! - **IV**: 128 bits (16 bytes), fresh per operation. GCM hashes non-96-bit
//!   IVs through GHASH, which keeps the layout compatible with blobs written
//!   by other AES-GCM implementations using the same IV length.
//! - **Randomness**: `ring::rand::SystemRandom`, the only RNG in the crate.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{PhiVaultError, Result};

/// AES-256-GCM parameterised for a 16-byte IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Size of a master secret or derived data key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of the per-operation IV in bytes.
pub const IV_LEN: usize = 16;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Fill `buf` from the system RNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    let rng = SystemRandom::new();
    rng.fill(buf).map_err(|_| PhiVaultError::RandomnessFailure)
}

/// Generate a fresh 32-byte secret for a new key generation.
pub fn generate_random_key() -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(key)
}

/// Encrypt `plaintext`, returning the ciphertext and the detached tag.
///
/// The ciphertext is the same length as the plaintext.
pub fn seal(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm16::new(GenericArray::from_slice(key));
    let mut buffer = plaintext.to_vec();

    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(iv), b"", &mut buffer)
        .map_err(|_| PhiVaultError::EncryptionFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok((buffer, tag_bytes))
}

/// Decrypt `ciphertext` and verify `tag`.
///
/// A wrong key or any modification of IV, tag or ciphertext fails with
/// `AuthenticationFailed`. The caller receives no partial plaintext: the
/// working buffer is only returned after the tag verifies.
pub fn open(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new(GenericArray::from_slice(key));
    let mut buffer = ciphertext.to_vec();

    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            b"",
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| PhiVaultError::AuthenticationFailed)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [7u8; KEY_LEN];
        let iv = [9u8; IV_LEN];
        let (ciphertext, tag) = seal(&key, &iv, b"blood type: O-").unwrap();
        assert_eq!(ciphertext.len(), b"blood type: O-".len());
        assert_eq!(open(&key, &iv, &ciphertext, &tag).unwrap(), b"blood type: O-");
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let iv = [1u8; IV_LEN];
        let (ciphertext, tag) = seal(&[1u8; KEY_LEN], &iv, b"payload").unwrap();
        assert!(matches!(
            open(&[2u8; KEY_LEN], &iv, &ciphertext, &tag),
            Err(PhiVaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(generate_random_key().unwrap(), generate_random_key().unwrap());
    }
}
