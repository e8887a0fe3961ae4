//! AES-256-CBC payload cipher.
//!
//! Wire format (bit-exact, enforced on read): the ASCII string
//! `HEX(IV) ":" HEX(ciphertext)` — exactly two lowercase hex groups separated
//! by one colon.  The IV is 16 random bytes (32 hex chars); the ciphertext is
//! the AES-256-CBC encryption with PKCS#7 padding of the UTF-8 JSON of the
//! payload object.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{Map, Value};

use crate::CredentialError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

/// A configured AES-256-CBC cipher.
///
/// Construction fails unless the key is exactly 32 bytes supplied as 64 hex
/// characters.  The key is never logged or echoed in errors.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher([REDACTED])")
    }
}

impl Cipher {
    /// Build a cipher from a 64-character hex key.
    ///
    /// # Errors
    /// [`CredentialError::BadKey`] for any other length or non-hex input.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CredentialError> {
        if hex_key.len() != 64 {
            return Err(CredentialError::BadKey);
        }
        let bytes = hex::decode(hex_key).map_err(|_| CredentialError::BadKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| CredentialError::BadKey)?;
        Ok(Self { key })
    }

    /// Encrypt a payload object into the `HEX(IV):HEX(ciphertext)` form.
    pub fn encrypt(&self, payload: &Map<String, Value>) -> String {
        let plaintext = serde_json::to_vec(payload).expect("JSON object always serializes");

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    /// Decrypt a stored ciphertext string back into the payload object.
    ///
    /// # Errors
    /// [`CredentialError::BadCiphertext`] for any shape violation, padding
    /// failure (wrong key), or non-object plaintext.
    pub fn decrypt(&self, stored: &str) -> Result<Map<String, Value>, CredentialError> {
        let (iv_hex, ct_hex) = parse_wire_form(stored)?;

        let iv_bytes = hex::decode(iv_hex).map_err(|_| CredentialError::BadCiphertext)?;
        let iv: [u8; IV_LEN] = iv_bytes
            .try_into()
            .map_err(|_| CredentialError::BadCiphertext)?;
        let ciphertext = hex::decode(ct_hex).map_err(|_| CredentialError::BadCiphertext)?;
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CredentialError::BadCiphertext);
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CredentialError::BadCiphertext)?;

        match serde_json::from_slice::<Value>(&plaintext) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(CredentialError::BadCiphertext),
        }
    }
}

/// Split `HEX(IV):HEX(ciphertext)` into its two groups, rejecting anything
/// that is not exactly that shape.
fn parse_wire_form(stored: &str) -> Result<(&str, &str), CredentialError> {
    let mut parts = stored.split(':');
    let (Some(iv_hex), Some(ct_hex), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CredentialError::BadCiphertext);
    };
    if iv_hex.len() != IV_LEN * 2 || ct_hex.is_empty() {
        return Err(CredentialError::BadCiphertext);
    }
    let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());
    if !is_hex(iv_hex) || !is_hex(ct_hex) {
        return Err(CredentialError::BadCiphertext);
    }
    Ok((iv_hex, ct_hex))
}
