//! Building wrapped envelopes
//!
//! The inverse of unwrapping: the rumor is sealed (encrypted to the
//! recipient and signed by its author), then the seal is wrapped under a
//! fresh ephemeral key and addressed to the recipient with a `p` tag.
//! Seal and wrapper carry the rumor's timestamp so roster watermarks line up
//! with the updates they describe.

use super::error::{EnvelopeError, EnvelopeResult};
use crate::core_crypto::{self, ConversationKey, Scheme};
use crate::core_event::{kinds, Event, EventBuilder};
use crate::core_identity::{Identity, Keys};

/// Seal and wrap `rumor` for `recipient` under `scheme`
pub fn wrap(
    author: &Keys,
    rumor: &Event,
    recipient: &Identity,
    scheme: Scheme,
) -> EnvelopeResult<Event> {
    let seal = seal(author, rumor, recipient, scheme)?;
    wrap_seal(&seal, recipient, scheme)
}

/// Encrypt `rumor` to `recipient` inside a seal signed by `author`
pub fn seal(
    author: &Keys,
    rumor: &Event,
    recipient: &Identity,
    scheme: Scheme,
) -> EnvelopeResult<Event> {
    if rumor.pubkey != *author.identity() {
        return Err(EnvelopeError::SenderMismatch {
            seal: author.identity().to_string(),
            rumor: rumor.pubkey.to_string(),
        });
    }

    let key = ConversationKey::derive(author.secret_key(), recipient, scheme)?;
    let content = core_crypto::encrypt(scheme, &key, &rumor.to_json()?)?;

    Ok(EventBuilder::new(kinds::SEAL, content).created_at(rumor.created_at).sign(author)?)
}

/// Wrap an existing seal under a fresh ephemeral key
pub fn wrap_seal(seal: &Event, recipient: &Identity, scheme: Scheme) -> EnvelopeResult<Event> {
    let ephemeral = Keys::generate();
    let key = ConversationKey::derive(ephemeral.secret_key(), recipient, scheme)?;
    let content = core_crypto::encrypt(scheme, &key, &seal.to_json()?)?;

    Ok(EventBuilder::new(scheme.wrapper_kind(), content)
        .tag("p", recipient.as_str())
        .created_at(seal.created_at)
        .sign(&ephemeral)?)
}
