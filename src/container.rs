//! Encryption/decryption using PBKDF2 + AES-256-CBC
//!
//! This module implements password-based encryption using:
//! - PBKDF2-HMAC-SHA256 (100 000 rounds) for key derivation from the password
//! - AES-256 in CBC mode with PKCS#7 padding
//!
//! The binary container format is:
//! - salt: 16 bytes
//! - iv: 16 bytes
//! - ciphertext: variable length, always a non-zero multiple of 16 bytes
//!
//! There is no magic number, version tag, or authentication tag. A wrong
//! password is detected through malformed padding, which catches almost all
//! cases but not every corruption of the ciphertext.

use crate::error::{ErrorCategory, ErrorKind, MessError, Result};
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of the CBC initialization vector in bytes
pub const IV_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// AES block size in bytes
pub const BLOCK_LEN: usize = 16;

/// Bytes preceding the ciphertext
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN;

/// PBKDF2 iteration count
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Derive a 32-byte key from a password and salt using PBKDF2-HMAC-SHA256
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ROUNDS, &mut *key);
    key
}

/// Encrypt plaintext with a password using random salt and IV
///
/// Returns the container: salt(16) + iv(16) + ciphertext(variable)
pub fn seal(password: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    seal_deterministic(password, plaintext, &salt, &iv)
}

/// Encrypt plaintext with a password using provided salt and IV
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `seal()` which generates random salt/IV.
pub fn seal_deterministic(
    password: &[u8],
    plaintext: &[u8],
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
) -> Vec<u8> {
    let key = derive_key(password, salt);
    let ciphertext =
        Aes256CbcEnc::new(&(*key).into(), &(*iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut output = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    output.extend_from_slice(salt);
    output.extend_from_slice(iv);
    output.extend_from_slice(&ciphertext);
    output
}

/// Decrypt a container with a password
pub fn open(password: &[u8], container: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if container.len() < HEADER_LEN {
        return Err(MessError::with_kind(
            ErrorCategory::User,
            ErrorKind::TruncatedInput,
            "input likely truncated while reading salt and IV",
        ));
    }

    let (salt, rest) = container.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(MessError::with_kind(
            ErrorCategory::User,
            ErrorKind::BinaryFormat,
            format!(
                "ciphertext length {} is not a non-zero multiple of {BLOCK_LEN}",
                ciphertext.len()
            ),
        ));
    }

    let salt: &[u8; SALT_LEN] = salt.try_into().map_err(|_| {
        MessError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to read salt",
        )
    })?;
    let iv: &[u8; IV_LEN] = iv.try_into().map_err(|_| {
        MessError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to read IV",
        )
    })?;

    let key = derive_key(password, salt);
    let plaintext = Aes256CbcDec::new(&(*key).into(), &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| {
            MessError::with_kind(
                ErrorCategory::User,
                ErrorKind::DecryptionFailed,
                "bad padding after decryption: wrong password or corrupt input",
            )
        })?;

    Ok(Zeroizing::new(plaintext))
}
