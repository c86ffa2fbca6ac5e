//! Authorization chain
//!
//! Providers are asked in order and the first "yes" wins. New strategies
//! are added by appending a provider.

use super::provider::AccessProvider;
use crate::core_identity::Identity;
use std::sync::Arc;
use tracing::debug;

/// Ordered, short-circuiting list of access providers
#[derive(Clone, Default)]
pub struct AuthorizationChain {
    providers: Vec<Arc<dyn AccessProvider>>,
}

impl AuthorizationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the end of the chain
    pub fn with(mut self, provider: Arc<dyn AccessProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Provider names in evaluation order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Name of the first provider granting `identity`, if any
    pub async fn granted_by(&self, identity: &Identity) -> Option<&'static str> {
        for provider in &self.providers {
            if provider.try_authorize(identity).await {
                return Some(provider.name());
            }
        }
        None
    }

    /// Whether any provider grants `identity` access
    pub async fn decide(&self, identity: &Identity) -> bool {
        match self.granted_by(identity).await {
            Some(provider) => {
                metrics::counter!("acl.decisions.granted", "provider" => provider).increment(1);
                debug!(identity = %identity, provider, "Access granted");
                true
            }
            None => {
                metrics::counter!("acl.decisions.denied").increment(1);
                debug!(identity = %identity, "Access denied");
                false
            }
        }
    }
}

impl std::fmt::Debug for AuthorizationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationChain").field("providers", &self.provider_names()).finish()
    }
}
