/*
    conversation.rs - Pairwise conversation keys

    A conversation key is the symmetric secret two identities share through
    secp256k1 ECDH. Each encryption scheme post-processes the shared x
    coordinate differently:

    - Legacy:  the raw shared x coordinate
    - Current: HKDF-SHA256-extract(salt = "nip44-v2", ikm = shared x)

    ConversationKeyCache memoizes derivations. Entries are keyed by a hash of
    (scheme, secret, peer) so keys derived for one scheme are never served
    for the other, and failed derivations leave no entry behind.
*/

use super::error::{CryptoError, CryptoResult};
use crate::core_event::kinds;
use crate::core_identity::Identity;
use hkdf::Hkdf;
use secp256k1::{ecdh, Parity, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// HKDF salt for the current scheme
const NIP44_SALT: &[u8] = b"nip44-v2";

/// Encryption scheme of a wrapped envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// AES-256-CBC with the raw shared secret (NIP-04)
    Legacy,
    /// ChaCha20 + HMAC-SHA256 with an HKDF-derived key (NIP-44 v2)
    Current,
}

impl Scheme {
    /// Scheme selected by a wrapper kind
    pub fn from_wrapper_kind(kind: u16) -> Option<Self> {
        match kind {
            kinds::WRAP_CURRENT => Some(Scheme::Current),
            kinds::WRAP_LEGACY => Some(Scheme::Legacy),
            _ => None,
        }
    }

    /// Wrapper kind carrying this scheme
    pub fn wrapper_kind(self) -> u16 {
        match self {
            Scheme::Current => kinds::WRAP_CURRENT,
            Scheme::Legacy => kinds::WRAP_LEGACY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Scheme::Legacy => "nip04",
            Scheme::Current => "nip44-v2",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Symmetric key shared by two identities under one scheme
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ConversationKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the key for `scheme` without caching
    pub fn derive(secret: &SecretKey, peer: &Identity, scheme: Scheme) -> CryptoResult<Self> {
        let shared = shared_x(secret, peer)?;

        match scheme {
            Scheme::Legacy => Ok(ConversationKey(*shared)),
            Scheme::Current => {
                let (prk, _) = Hkdf::<Sha256>::extract(Some(NIP44_SALT), shared.as_ref());
                let mut key = [0u8; 32];
                key.copy_from_slice(&prk);
                Ok(ConversationKey(key))
            }
        }
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

/// ECDH x coordinate between `secret` and the even-y lift of `peer`
fn shared_x(secret: &SecretKey, peer: &Identity) -> CryptoResult<Zeroizing<[u8; 32]>> {
    let xonly = XOnlyPublicKey::from_slice(&peer.to_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("{}: {}", peer.short(), e)))?;
    let point = Zeroizing::new(ecdh::shared_secret_point(&xonly.public_key(Parity::Even), secret));

    let mut x = Zeroizing::new([0u8; 32]);
    x.copy_from_slice(&point[..32]);
    Ok(x)
}

/// Thread-safe memo of conversation keys
#[derive(Default)]
pub struct ConversationKeyCache {
    entries: RwLock<HashMap<[u8; 32], ConversationKey>>,
    derivations: AtomicU64,
}

impl ConversationKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key for (secret, peer, scheme), deriving it once
    pub fn get_or_derive(
        &self,
        secret: &SecretKey,
        peer: &Identity,
        scheme: Scheme,
    ) -> CryptoResult<ConversationKey> {
        let cache_key = cache_key(secret, peer, scheme);

        if let Some(key) =
            self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&cache_key)
        {
            return Ok(key.clone());
        }

        let key = ConversationKey::derive(secret, peer, scheme)?;
        self.derivations.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(cache_key).or_insert(key).clone())
    }

    /// Number of expensive derivations performed so far
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConversationKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationKeyCache")
            .field("entries", &self.len())
            .field("derivations", &self.derivation_count())
            .finish()
    }
}

fn cache_key(secret: &SecretKey, peer: &Identity, scheme: Scheme) -> [u8; 32] {
    let secret_bytes = Zeroizing::new(secret.secret_bytes());
    let mut hasher = Sha256::new();
    hasher.update(scheme.label().as_bytes());
    hasher.update(&*secret_bytes);
    hasher.update(peer.to_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::Keys;
    use std::sync::Arc;

    const SECRET_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const SECRET_TWO: &str = "0000000000000000000000000000000000000000000000000000000000000002";

    #[test]
    fn test_current_scheme_known_vector() {
        let one = Keys::parse(SECRET_ONE).unwrap();
        let two = Keys::parse(SECRET_TWO).unwrap();

        let key = ConversationKey::derive(one.secret_key(), two.identity(), Scheme::Current)
            .unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "c41c775356fd92eadc63ff5a0dc1da211b268cbea22316767095b2871ea1412d"
        );
    }

    #[test]
    fn test_derivation_is_symmetric() {
        let alice = Keys::generate();
        let bob = Keys::generate();

        for scheme in [Scheme::Legacy, Scheme::Current] {
            let ab = ConversationKey::derive(alice.secret_key(), bob.identity(), scheme).unwrap();
            let ba = ConversationKey::derive(bob.secret_key(), alice.identity(), scheme).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_cache_derives_once() {
        let cache = ConversationKeyCache::new();
        let alice = Keys::generate();
        let bob = Keys::generate();

        let first = cache.get_or_derive(alice.secret_key(), bob.identity(), Scheme::Current).unwrap();
        let second =
            cache.get_or_derive(alice.secret_key(), bob.identity(), Scheme::Current).unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(cache.derivation_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_separates_schemes() {
        let cache = ConversationKeyCache::new();
        let alice = Keys::generate();
        let bob = Keys::generate();

        let current =
            cache.get_or_derive(alice.secret_key(), bob.identity(), Scheme::Current).unwrap();
        let legacy = cache.get_or_derive(alice.secret_key(), bob.identity(), Scheme::Legacy).unwrap();

        assert_ne!(current, legacy);
        assert_eq!(cache.derivation_count(), 2);
    }

    #[test]
    fn test_failed_derivation_is_not_cached() {
        let cache = ConversationKeyCache::new();
        let alice = Keys::generate();
        // x = 5 is not on the curve
        let off_curve = Identity::parse(&format!("{:064x}", 5)).unwrap();

        assert!(cache.get_or_derive(alice.secret_key(), &off_curve, Scheme::Current).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.derivation_count(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ConversationKeyCache::new());
        let alice = Keys::generate();
        let bob = Keys::generate();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let alice = alice.clone();
                let bob = bob.identity().clone();
                std::thread::spawn(move || {
                    cache.get_or_derive(alice.secret_key(), &bob, Scheme::Current).unwrap()
                })
            })
            .collect();

        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_scheme_from_kind() {
        assert_eq!(Scheme::from_wrapper_kind(1059), Some(Scheme::Current));
        assert_eq!(Scheme::from_wrapper_kind(1060), Some(Scheme::Legacy));
        assert_eq!(Scheme::from_wrapper_kind(13), None);
        assert_eq!(Scheme::Current.wrapper_kind(), 1059);
    }
}
