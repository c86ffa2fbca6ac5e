//! Envelope module
//!
//! Three-layer envelopes (wrapper → seal → rumor) under either scheme.

pub mod error;
pub mod unwrap;
pub mod wrap;

pub use error::{EnvelopeError, EnvelopeResult};
pub use unwrap::EnvelopeUnwrapper;
pub use wrap::wrap;
