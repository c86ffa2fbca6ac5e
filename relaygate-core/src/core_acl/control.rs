/*
    control.rs - Relay-facing access policy

    AccessControl wires the authorization chain to the three places a relay
    asks for a decision:

    - reject_event: the write path. Join requests are processed before the
      decision so a valid claim admits its author in the same request.
    - reject_filter: the read path. Join events are never served.
    - on_incoming_event: side effects of stored events. Joins record claims,
      wrappers addressed to us feed the roster synchronizer.

    Invite events are produced on demand for authorized readers who ask for
    them.
*/

use super::chain::AuthorizationChain;
use super::error::AclError;
use super::provider::Whitelist;
use crate::config::{AuthConfig, Config};
use crate::core_backend::{BackendDelegateCache, HttpRemoteAuthority, RemoteAuthority};
use crate::core_claims::store::normalize_code;
use crate::core_claims::{ClaimPolicy, ClaimStore, ClaimType};
use crate::core_envelope::EnvelopeUnwrapper;
use crate::core_event::{kinds, Event, EventBuilder, EventSource, Filter};
use crate::core_identity::{Identity, Keys};
use crate::core_keys::SharedKeyRegistry;
use crate::core_roster::{IngestOutcome, Roster, RosterSynchronizer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tag carrying a claim or invite code
pub const CLAIM_TAG: &str = "claim";

/// Which checks the relay enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Readers and writers must be authenticated and authorized
    pub restrict_user: bool,
    /// Event authors must be authorized
    pub restrict_author: bool,
    /// Authorized users may request invite codes
    pub generate_invites: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self { restrict_user: true, restrict_author: false, generate_invites: false }
    }
}

impl From<&AuthConfig> for AccessPolicy {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            restrict_user: auth.restrict_user,
            restrict_author: auth.restrict_author,
            generate_invites: auth.generate_invites,
        }
    }
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AuthRequired,
    NotMember,
    AuthorNotMember,
    InvalidInvite,
    JoinQuery,
}

impl Rejection {
    /// Message returned to the client
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::AuthRequired => "auth-required: authentication is required for access",
            Rejection::NotMember => "restricted: you are not a member of this relay",
            Rejection::AuthorNotMember => "restricted: event author is not a member of this relay",
            Rejection::InvalidInvite => "restricted: failed to validate invite code",
            Rejection::JoinQuery => "restricted: join events cannot be queried",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// What `on_incoming_event` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// A join request was processed
    Claim { granted: bool },
    /// A wrapper was handed to the synchronizer
    Wrapper(IngestOutcome),
    /// Nothing to do
    Ignored,
}

/// Access decisions and policy hooks for one relay
pub struct AccessControl {
    chain: AuthorizationChain,
    claims: Arc<ClaimStore>,
    sync: Arc<RosterSynchronizer>,
    relay_keys: Keys,
    policy: AccessPolicy,
}

impl AccessControl {
    pub fn new(
        chain: AuthorizationChain,
        claims: Arc<ClaimStore>,
        sync: Arc<RosterSynchronizer>,
        relay_keys: Keys,
        policy: AccessPolicy,
    ) -> Self {
        Self { chain, claims, sync, relay_keys, policy }
    }

    /// Assemble the engine from configuration
    ///
    /// The chain order is whitelist, claims, backend, roster.
    pub fn from_config(
        config: &Config,
        sources: Vec<Arc<dyn EventSource>>,
    ) -> Result<Self, AclError> {
        let relay_keys = config.relay_keys()?;
        let mut trusted = vec![relay_keys.clone()];
        trusted.extend(config.trusted_keys()?);

        std::fs::create_dir_all(&config.store.data_dir)
            .map_err(|e| AclError::DataDir(format!("{}: {}", config.store.data_dir.display(), e)))?;
        let policy = ClaimPolicy::new(
            config.auth.relay_claims.iter().cloned(),
            config.auth.group_claims.iter().cloned(),
        );
        let claims = Arc::new(ClaimStore::open(config.claims_db_path(), policy)?);

        let authority = match &config.auth.backend_url {
            Some(url) => Some(Arc::new(HttpRemoteAuthority::new(
                url.clone(),
                config.auth.backend_timeout,
            )?) as Arc<dyn RemoteAuthority>),
            None => None,
        };
        let backend = Arc::new(BackendDelegateCache::new(authority, config.auth.backend_ttl));

        let roster = Arc::new(Roster::new());
        let sync = Arc::new(
            RosterSynchronizer::new(
                sources,
                trusted,
                Arc::new(SharedKeyRegistry::new()),
                Arc::clone(&roster),
                EnvelopeUnwrapper::default(),
            )
            .with_full_resync_every(config.sync.full_resync_every),
        );

        let chain = AuthorizationChain::new()
            .with(Arc::new(Whitelist::new(config.whitelist()?)))
            .with(claims.clone())
            .with(backend)
            .with(roster);

        info!(
            relay = %relay_keys.identity(),
            providers = ?chain.provider_names(),
            backend = config.auth.backend_url.is_some(),
            "Access control ready"
        );

        Ok(Self::new(chain, claims, sync, relay_keys, AccessPolicy::from(&config.auth)))
    }

    pub fn chain(&self) -> &AuthorizationChain {
        &self.chain
    }

    pub fn claims(&self) -> &Arc<ClaimStore> {
        &self.claims
    }

    pub fn synchronizer(&self) -> &Arc<RosterSynchronizer> {
        &self.sync
    }

    pub fn relay_identity(&self) -> &Identity {
        self.relay_keys.identity()
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    /// Whether `identity` has access
    pub async fn decide(&self, identity: &Identity) -> bool {
        self.chain.decide(identity).await
    }

    /// React to an event the relay has accepted
    pub async fn on_incoming_event(&self, event: &Event) -> IncomingOutcome {
        if kinds::is_join(event.kind) {
            return IncomingOutcome::Claim { granted: self.handle_join(event).await };
        }

        if self.sync.is_relevant(event) {
            return IncomingOutcome::Wrapper(self.sync.ingest_wrapper(event).await);
        }

        IncomingOutcome::Ignored
    }

    /// Record the claim carried by a join request
    ///
    /// Returns true if a new claim was recorded for the author.
    async fn handle_join(&self, event: &Event) -> bool {
        let Some(claim_type) = ClaimType::from_join_kind(event.kind) else {
            return false;
        };
        let Some(claim) = event.first_tag_value(CLAIM_TAG).filter(|c| !c.is_empty()) else {
            debug!(author = %event.pubkey, "Join without claim");
            return false;
        };
        if let Err(e) = event.verify() {
            warn!(event = %event.id, error = %e, "Ignoring unverifiable join");
            return false;
        }

        let (author, claim) = (event.pubkey.clone(), claim.to_string());
        let recorded = self
            .claims
            .run_blocking({
                let (author, claim) = (author.clone(), claim.clone());
                move |store| store.add_claim(&author, &claim, claim_type)
            })
            .await;

        match recorded {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!(author = %author, error = %e, "Failed to record claim");
                return false;
            }
        }

        if claim_type == ClaimType::Relay {
            return self.redeem_invite(&author, &claim).await;
        }

        false
    }

    /// Redeem `code` for `redeemer` if its issuer still has access
    async fn redeem_invite(&self, redeemer: &Identity, code: &str) -> bool {
        let code = normalize_code(code);
        let redeemed = self
            .claims
            .run_blocking({
                let code = code.clone();
                move |store| store.redeem_invite(&code)
            })
            .await;
        let issuer = match redeemed {
            Ok(Some(issuer)) => issuer,
            Ok(None) => return false,
            Err(e) => {
                warn!(redeemer = %redeemer, error = %e, "Failed to redeem invite");
                return false;
            }
        };

        if !self.decide(&issuer).await {
            info!(redeemer = %redeemer, issuer = %issuer, "Invite issuer no longer has access");
            return false;
        }

        let granted = self
            .claims
            .run_blocking({
                let redeemer = redeemer.clone();
                move |store| store.grant_claim(&redeemer, &code, ClaimType::Invite)
            })
            .await;
        match granted {
            Ok(_) => true,
            Err(e) => {
                warn!(redeemer = %redeemer, error = %e, "Failed to record invite claim");
                false
            }
        }
    }

    /// Write-path check; `None` accepts the event
    pub async fn reject_event(
        &self,
        authed: Option<&Identity>,
        event: &Event,
    ) -> Option<Rejection> {
        if kinds::is_join(event.kind) {
            self.handle_join(event).await;
            if self.policy.restrict_user && !self.decide(&event.pubkey).await {
                return Some(Rejection::InvalidInvite);
            }
            return None;
        }

        if self.policy.restrict_author && !self.decide(&event.pubkey).await {
            return Some(Rejection::AuthorNotMember);
        }

        self.check_auth(authed).await
    }

    /// Read-path check; `None` accepts the filter
    pub async fn reject_filter(
        &self,
        authed: Option<&Identity>,
        filter: &Filter,
    ) -> Option<Rejection> {
        if kinds::JOINS.iter().any(|kind| filter.names_kind(*kind)) {
            return Some(Rejection::JoinQuery);
        }

        self.check_auth(authed).await
    }

    async fn check_auth(&self, authed: Option<&Identity>) -> Option<Rejection> {
        if !self.policy.restrict_user {
            return None;
        }
        let Some(identity) = authed else {
            return Some(Rejection::AuthRequired);
        };
        if !self.decide(identity).await {
            return Some(Rejection::NotMember);
        }
        None
    }

    /// Invite events to serve for `filter`
    ///
    /// Issues one fresh code when invites are enabled, the filter asks for
    /// invite events and the reader has access.
    pub async fn invite_events(&self, authed: Option<&Identity>, filter: &Filter) -> Vec<Event> {
        if !self.policy.generate_invites || !filter.names_kind(kinds::RELAY_INVITE) {
            return Vec::new();
        }
        let Some(issuer) = authed else {
            return Vec::new();
        };
        if !self.decide(issuer).await {
            return Vec::new();
        }

        let issued = self
            .claims
            .run_blocking({
                let issuer = issuer.clone();
                move |store| store.issue_invite(&issuer)
            })
            .await;
        let code = match issued {
            Ok(code) => code,
            Err(e) => {
                warn!(issuer = %issuer, error = %e, "Failed to issue invite");
                return Vec::new();
            }
        };

        match EventBuilder::new(kinds::RELAY_INVITE, "")
            .tag(CLAIM_TAG, &code)
            .sign(&self.relay_keys)
        {
            Ok(event) => vec![event],
            Err(e) => {
                warn!(issuer = %issuer, error = %e, "Failed to sign invite event");
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessControl")
            .field("relay", self.relay_identity())
            .field("chain", &self.chain)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
