//! Current envelope scheme (NIP-44 version 2)
//!
//! ## Format
//!
//! ```text
//! base64( version[1] = 0x02 || nonce[32] || ciphertext || mac[32] )
//! ```
//!
//! Per-message keys come from HKDF-SHA256-expand(conversation key, nonce)
//! and split into a ChaCha20 key, a ChaCha20 nonce and an HMAC key. The MAC
//! covers `nonce || ciphertext` and is checked before anything is decrypted.
//! Plaintext is length-prefixed (u16, big endian) and zero padded so that
//! ciphertext lengths leak only a coarse size bucket.

use super::conversation::ConversationKey;
use super::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Payload version byte
pub const VERSION: u8 = 2;

/// Smallest and largest plaintext in bytes
pub const MIN_PLAINTEXT_SIZE: usize = 1;
pub const MAX_PLAINTEXT_SIZE: usize = 65535;

const NONCE_SIZE: usize = 32;
const MAC_SIZE: usize = 32;
const MESSAGE_KEYS_SIZE: usize = 76;

const MIN_ENCODED_SIZE: usize = 132;
const MAX_ENCODED_SIZE: usize = 87472;
const MIN_DECODED_SIZE: usize = 99;
const MAX_DECODED_SIZE: usize = 65603;

struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

impl Drop for MessageKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.chacha_key.zeroize();
        self.chacha_nonce.zeroize();
        self.hmac_key.zeroize();
    }
}

fn message_keys(key: &ConversationKey, nonce: &[u8]) -> CryptoResult<MessageKeys> {
    let hk = Hkdf::<Sha256>::from_prk(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let mut okm = Zeroizing::new([0u8; MESSAGE_KEYS_SIZE]);
    hk.expand(nonce, &mut okm[..]).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut keys = MessageKeys { chacha_key: [0; 32], chacha_nonce: [0; 12], hmac_key: [0; 32] };
    keys.chacha_key.copy_from_slice(&okm[..32]);
    keys.chacha_nonce.copy_from_slice(&okm[32..44]);
    keys.hmac_key.copy_from_slice(&okm[44..]);
    Ok(keys)
}

/// Padded plaintext length for a message of `len` bytes
pub fn calc_padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }

    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT_SIZE..=MAX_PLAINTEXT_SIZE).contains(&len) {
        return Err(CryptoError::InvalidPlaintextLength(len));
    }

    let mut padded = Vec::with_capacity(2 + calc_padded_len(len));
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + calc_padded_len(len), 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> CryptoResult<&[u8]> {
    if padded.len() < 2 {
        return Err(CryptoError::InvalidPadding);
    }

    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT_SIZE || padded.len() != 2 + calc_padded_len(len) {
        return Err(CryptoError::InvalidPadding);
    }

    Ok(&padded[2..2 + len])
}

fn mac(hmac_key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> CryptoResult<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(hmac_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(nonce);
    mac.update(ciphertext);
    Ok(mac)
}

/// Encrypt `plaintext` with a fresh random nonce
pub fn encrypt(key: &ConversationKey, plaintext: &str) -> CryptoResult<String> {
    encrypt_with_nonce(key, plaintext, &rand::random::<[u8; NONCE_SIZE]>())
}

/// Encrypt `plaintext` with a caller-chosen nonce
///
/// Nonces must never repeat under one conversation key.
pub fn encrypt_with_nonce(
    key: &ConversationKey,
    plaintext: &str,
    nonce: &[u8; NONCE_SIZE],
) -> CryptoResult<String> {
    let keys = message_keys(key, nonce)?;
    let mut buffer = pad(plaintext.as_bytes())?;

    let mut cipher = ChaCha20::new_from_slices(&keys.chacha_key, &keys.chacha_nonce)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher.apply_keystream(&mut buffer);

    let tag = mac(&keys.hmac_key, nonce, &buffer)?.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + buffer.len() + MAC_SIZE);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buffer);
    payload.extend_from_slice(&tag);
    Ok(STANDARD.encode(payload))
}

/// Decrypt a base64 payload
pub fn decrypt(key: &ConversationKey, payload: &str) -> CryptoResult<String> {
    if payload.starts_with('#') {
        return Err(CryptoError::MalformedPayload("unsupported encoding".to_string()));
    }
    if !(MIN_ENCODED_SIZE..=MAX_ENCODED_SIZE).contains(&payload.len()) {
        return Err(CryptoError::InvalidSize(payload.len()));
    }

    let data = STANDARD.decode(payload).map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
    if !(MIN_DECODED_SIZE..=MAX_DECODED_SIZE).contains(&data.len()) {
        return Err(CryptoError::InvalidSize(data.len()));
    }
    if data[0] != VERSION {
        return Err(CryptoError::UnknownVersion(data[0]));
    }

    let nonce = &data[1..1 + NONCE_SIZE];
    let ciphertext = &data[1 + NONCE_SIZE..data.len() - MAC_SIZE];
    let tag = &data[data.len() - MAC_SIZE..];

    let keys = message_keys(key, nonce)?;
    mac(&keys.hmac_key, nonce, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| CryptoError::InvalidMac)?;

    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    let mut cipher = ChaCha20::new_from_slices(&keys.chacha_key, &keys.chacha_nonce)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher.apply_keystream(&mut buffer);

    let plaintext = unpad(&buffer)?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
}
