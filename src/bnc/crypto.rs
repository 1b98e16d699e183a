//! BNC payload cryptography
//!
//! The bank expects request bodies encrypted with AES-256-CBC/PKCS#7 and
//! Base64 encoded, with key and IV derived from the session key through
//! PBKDF2-HMAC-SHA1 (1000 rounds, fixed salt `Ivan Medvedev`). The
//! plaintext is the JSON text in UTF-16LE. Alongside the ciphertext goes a
//! lowercase hex SHA-256 of the UTF-8 JSON text.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KDF_SALT: &[u8] = b"Ivan Medvedev";
const KDF_ROUNDS: u32 = 1000;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Characters kept at each end by [`preview`]
const PREVIEW_CHARS: usize = 4;

/// Errors from the payload cipher
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Ciphertext is not valid base64")]
    Encoding,

    #[error("Decryption failed (stale key or corrupted ciphertext)")]
    Decrypt,

    #[error("Decrypted payload is not valid UTF-16 text")]
    Text,
}

/// Derive the AES key and IV from a session key
fn derive_key_iv(secret: &str) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = [0u8; KEY_LEN + IV_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(secret.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut derived);

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..]);
    (key, iv)
}

fn to_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn from_utf16le(bytes: &[u8]) -> Result<String, CryptoError> {
    if bytes.len() % 2 != 0 {
        return Err(CryptoError::Text);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| CryptoError::Text)
}

/// Encrypt already-serialized JSON text
pub fn encrypt_text(plaintext: &str, key: &str) -> String {
    let (aes_key, iv) = derive_key_iv(key);
    let ciphertext = Aes256CbcEnc::new(&aes_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&to_utf16le(plaintext));
    BASE64_STANDARD.encode(ciphertext)
}

/// Decrypt to the JSON text
pub fn decrypt_text(ciphertext: &str, key: &str) -> Result<String, CryptoError> {
    let raw = BASE64_STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::Encoding)?;
    let (aes_key, iv) = derive_key_iv(key);
    let plain = Aes256CbcDec::new(&aes_key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&raw)
        .map_err(|_| CryptoError::Decrypt)?;
    from_utf16le(&plain)
}

/// Serialize `payload` to JSON and encrypt it under `key`
pub fn encrypt<T: Serialize + ?Sized>(payload: &T, key: &str) -> Result<String, CryptoError> {
    let json = serde_json::to_string(payload)?;
    Ok(encrypt_text(&json, key))
}

/// Integrity token: hex SHA-256 of the payload's JSON text
pub fn sign<T: Serialize + ?Sized>(payload: &T) -> Result<String, CryptoError> {
    let json = serde_json::to_string(payload)?;
    Ok(hex::encode(Sha256::digest(json.as_bytes())))
}

/// Decrypt and parse a bank payload
pub fn decrypt<T: DeserializeOwned>(ciphertext: &str, key: &str) -> Result<T, CryptoError> {
    let json = decrypt_text(ciphertext, key)?;
    // The bank occasionally prefixes a BOM
    let json = json.trim_start_matches('\u{feff}');
    Ok(serde_json::from_str(json)?)
}

/// Short, non-reversible view of a secret for logs
pub fn preview(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= PREVIEW_CHARS * 2 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..PREVIEW_CHARS].iter().collect();
    let tail: String = chars[chars.len() - PREVIEW_CHARS..].iter().collect();
    format!("{}...{} ({} chars)", head, tail, chars.len())
}
