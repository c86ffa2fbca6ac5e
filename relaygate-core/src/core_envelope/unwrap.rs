/*
    unwrap.rs - Opening wrapped envelopes

    wrapper (signed, ephemeral author, encrypted to recipient)
      └─ seal (kind 13, signed by the real author, encrypted to recipient)
           └─ rumor (unsigned application event)

    The wrapper kind selects the scheme once; both layers are then opened
    with that scheme. Conversation keys come from the shared cache.

    The legacy scheme opens the wrapper layer only. Its seal layer reports
    `EnvelopeError::Unsupported` instead of guessing at the format.
*/

use super::error::{EnvelopeError, EnvelopeResult};
use crate::core_crypto::{self, ConversationKeyCache, Scheme};
use crate::core_event::{kinds, Event};
use secp256k1::SecretKey;
use std::sync::Arc;
use tracing::trace;

/// Recovers rumors from wrapper events
#[derive(Debug, Clone, Default)]
pub struct EnvelopeUnwrapper {
    cache: Arc<ConversationKeyCache>,
}

impl EnvelopeUnwrapper {
    /// Create an unwrapper sharing `cache`
    pub fn new(cache: Arc<ConversationKeyCache>) -> Self {
        Self { cache }
    }

    /// The conversation key cache in use
    pub fn cache(&self) -> &Arc<ConversationKeyCache> {
        &self.cache
    }

    /// Open `wrapper` with `secret` and return the innermost rumor
    pub fn unwrap(&self, secret: &SecretKey, wrapper: &Event) -> EnvelopeResult<Event> {
        let scheme = Scheme::from_wrapper_kind(wrapper.kind)
            .ok_or(EnvelopeError::UnknownWrapperKind(wrapper.kind))?;

        let seal = self.open_wrapper(scheme, secret, wrapper)?;
        let rumor = self.open_seal(scheme, secret, &seal)?;

        trace!(wrapper = %wrapper.id, kind = rumor.kind, scheme = %scheme, "Unwrapped envelope");
        Ok(rumor)
    }

    /// First layer: wrapper payload → seal
    pub fn open_wrapper(
        &self,
        scheme: Scheme,
        secret: &SecretKey,
        wrapper: &Event,
    ) -> EnvelopeResult<Event> {
        let key = self.cache.get_or_derive(secret, &wrapper.pubkey, scheme)?;
        let json = core_crypto::decrypt(scheme, &key, &wrapper.content)?;

        let seal = Event::from_json(&json).map_err(|e| EnvelopeError::MalformedSeal(e.to_string()))?;
        if seal.kind != kinds::SEAL {
            return Err(EnvelopeError::UnexpectedSealKind(seal.kind));
        }

        Ok(seal)
    }

    /// Second layer: seal payload → rumor
    pub fn open_seal(
        &self,
        scheme: Scheme,
        secret: &SecretKey,
        seal: &Event,
    ) -> EnvelopeResult<Event> {
        match scheme {
            Scheme::Legacy => {
                Err(EnvelopeError::Unsupported("legacy scheme seal layer".to_string()))
            }
            Scheme::Current => {
                seal.verify().map_err(|e| EnvelopeError::InvalidSeal(e.to_string()))?;

                let key = self.cache.get_or_derive(secret, &seal.pubkey, scheme)?;
                let json = core_crypto::decrypt(scheme, &key, &seal.content)?;

                let rumor = Event::from_json(&json)
                    .map_err(|e| EnvelopeError::MalformedRumor(e.to_string()))?;
                if rumor.pubkey != seal.pubkey {
                    return Err(EnvelopeError::SenderMismatch {
                        seal: seal.pubkey.to_string(),
                        rumor: rumor.pubkey.to_string(),
                    });
                }

                Ok(rumor)
            }
        }
    }
}
