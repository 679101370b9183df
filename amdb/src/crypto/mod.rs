//! AES-256-CBC encryption for values at rest.
//!
//! There is deliberately no fallback cipher for short keys: the original
//! implementation this engine is modeled on fell back to XOR when handed a
//! key shorter than 32 bytes, which is not an encryption scheme. This
//! implementation fails closed with [`Error::InvalidArgument`] instead.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::{CResult, Error};

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// Encrypts `plaintext` under `key`, prefixing the ciphertext with a random
/// 16-byte IV. `key` must be exactly 32 bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> CResult<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let key_ga = GenericArray::clone_from_slice(key);
    let iv_ga = GenericArray::clone_from_slice(&iv);
    let cipher = Encryptor::new(&key_ga, &iv_ga);
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a buffer produced by [`encrypt`]. `key` must be exactly 32 bytes.
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> CResult<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if ciphertext.len() < IV_LEN {
        return Err(Error::InvalidArgument("ciphertext shorter than IV".to_string()));
    }

    let (iv, body) = ciphertext.split_at(IV_LEN);
    let key_ga = GenericArray::clone_from_slice(key);
    let iv_ga = GenericArray::clone_from_slice(iv);
    let cipher = Decryptor::new(&key_ga, &iv_ga);
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|e| Error::Corruption(format!("ciphertext padding invalid: {e}")))
}
