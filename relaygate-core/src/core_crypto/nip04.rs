//! Legacy envelope scheme (NIP-04)
//!
//! AES-256-CBC with PKCS#7 padding, keyed by the raw ECDH x coordinate.
//! Payloads are `base64(ciphertext) + "?iv=" + base64(iv)`. There is no
//! MAC; a wrong key usually surfaces as a padding or UTF-8 failure.

use super::conversation::ConversationKey;
use super::error::{CryptoError, CryptoResult};
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;
const IV_SEPARATOR: &str = "?iv=";

/// Encrypt `plaintext` with a random IV
pub fn encrypt(key: &ConversationKey, plaintext: &str) -> CryptoResult<String> {
    encrypt_with_iv(key, plaintext, &rand::random::<[u8; IV_SIZE]>())
}

/// Encrypt `plaintext` with a caller-chosen IV
pub fn encrypt_with_iv(
    key: &ConversationKey,
    plaintext: &str,
    iv: &[u8; IV_SIZE],
) -> CryptoResult<String> {
    let bytes = plaintext.as_bytes();
    let mut buffer = Zeroizing::new(vec![0u8; bytes.len() + BLOCK_SIZE]);
    buffer[..bytes.len()].copy_from_slice(bytes);

    let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, bytes.len())
        .map_err(|_| CryptoError::InvalidPadding)?;

    Ok(format!("{}{}{}", STANDARD.encode(ciphertext), IV_SEPARATOR, STANDARD.encode(iv)))
}

/// Decrypt a `ciphertext?iv=iv` payload
pub fn decrypt(key: &ConversationKey, payload: &str) -> CryptoResult<String> {
    let (ciphertext_b64, iv_b64) = payload
        .split_once(IV_SEPARATOR)
        .ok_or_else(|| CryptoError::MalformedPayload("missing iv".to_string()))?;

    let iv = STANDARD.decode(iv_b64).map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidSize(iv.len()));
    }

    let mut buffer = Zeroizing::new(
        STANDARD.decode(ciphertext_b64).map_err(|e| CryptoError::InvalidBase64(e.to_string()))?,
    );
    if buffer.is_empty() || buffer.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidSize(buffer.len()));
    }

    let plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|_| CryptoError::InvalidPadding)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::Scheme;
    use crate::core_identity::Keys;

    fn pair() -> (ConversationKey, ConversationKey) {
        let alice = Keys::generate();
        let bob = Keys::generate();
        (
            ConversationKey::derive(alice.secret_key(), bob.identity(), Scheme::Legacy).unwrap(),
            ConversationKey::derive(bob.secret_key(), alice.identity(), Scheme::Legacy).unwrap(),
        )
    }

    #[test]
    fn test_roundtrip_between_peers() {
        let (sender, receiver) = pair();
        let payload = encrypt(&sender, "{\"kind\":13}").unwrap();
        assert!(payload.contains("?iv="));
        assert_eq!(decrypt(&receiver, &payload).unwrap(), "{\"kind\":13}");
    }

    #[test]
    fn test_block_aligned_plaintext() {
        let (sender, receiver) = pair();
        let message = "0123456789abcdef";
        let payload = encrypt_with_iv(&sender, message, &[9u8; IV_SIZE]).unwrap();
        assert_eq!(decrypt(&receiver, &payload).unwrap(), message);
    }

    #[test]
    fn test_malformed_payloads() {
        let (key, _) = pair();
        assert!(matches!(decrypt(&key, "abcd"), Err(CryptoError::MalformedPayload(_))));
        assert!(matches!(decrypt(&key, "abcd?iv=!!"), Err(CryptoError::InvalidBase64(_))));
        assert!(matches!(decrypt(&key, "AAAA?iv=AAAA"), Err(CryptoError::InvalidSize(3))));

        let iv = STANDARD.encode([0u8; IV_SIZE]);
        let short = format!("{}?iv={}", STANDARD.encode([1u8; 5]), iv);
        assert!(matches!(decrypt(&key, &short), Err(CryptoError::InvalidSize(5))));
    }

    #[test]
    fn test_wrong_key_does_not_yield_plaintext() {
        let (sender, _) = pair();
        let (other, _) = pair();
        let payload = encrypt(&sender, "secret roster").unwrap();
        assert_ne!(decrypt(&other, &payload).ok().as_deref(), Some("secret roster"));
    }
}
