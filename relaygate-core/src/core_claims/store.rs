/*
    store.rs - Claims and invite codes

    A claim records that an identity presented an eligibility token. Claims
    are append-only and unique per (identity, claim, type). Relay and group
    claims are accepted only if they appear in the configured allow-list for
    their type; invite claims are granted internally after a redemption.

    Invites are single-use codes mapping to the identity that issued them.
    Redemption reads and deletes in one statement, so a code can be
    redeemed at most once even under concurrent callers.
*/

use super::error::{ClaimError, ClaimResult};
use super::migrations;
use crate::core_event::{kinds, Timestamp};
use crate::core_identity::Identity;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Invite code alphabet; omits 0, 1, I, L and O
pub const INVITE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Invite code length
pub const INVITE_CODE_LEN: usize = 8;

const INVITE_ATTEMPTS: usize = 16;

/// Kind of eligibility a claim proves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimType {
    /// Relay-wide claim from a relay join
    Relay,
    /// Group claim from a group join
    Group,
    /// Redeemed invite code
    Invite,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Relay => "relay",
            ClaimType::Group => "group",
            ClaimType::Invite => "invite",
        }
    }

    /// Claim type requested by a join event kind
    pub fn from_join_kind(kind: u16) -> Option<Self> {
        match kind {
            kinds::RELAY_JOIN => Some(ClaimType::Relay),
            kinds::GROUP_JOIN => Some(ClaimType::Group),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimType {
    type Err = ClaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relay" => Ok(ClaimType::Relay),
            "group" => Ok(ClaimType::Group),
            "invite" => Ok(ClaimType::Invite),
            other => Err(ClaimError::UnknownClaimType(other.to_string())),
        }
    }
}

/// Allow-lists of accepted claim strings per type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub relay_claims: HashSet<String>,
    pub group_claims: HashSet<String>,
}

impl ClaimPolicy {
    pub fn new(
        relay_claims: impl IntoIterator<Item = String>,
        group_claims: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            relay_claims: relay_claims.into_iter().collect(),
            group_claims: group_claims.into_iter().collect(),
        }
    }

    /// Whether `claim` may be stored as `claim_type`
    pub fn allows(&self, claim_type: ClaimType, claim: &str) -> bool {
        match claim_type {
            ClaimType::Relay => self.relay_claims.contains(claim),
            ClaimType::Group => self.group_claims.contains(claim),
            ClaimType::Invite => false,
        }
    }
}

/// A stored claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredClaim {
    pub pubkey: Identity,
    pub claim: String,
    pub claim_type: ClaimType,
    pub created_at: Timestamp,
}

/// An outstanding invite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub code: String,
    pub issuer: Identity,
    pub created_at: Timestamp,
}

/// SQLite-backed claim and invite store
///
/// Clones share the same pool. Calls are synchronous; async callers go
/// through [`ClaimStore::run_blocking`].
#[derive(Clone)]
pub struct ClaimStore {
    pool: Pool<SqliteConnectionManager>,
    policy: Arc<ClaimPolicy>,
}

impl ClaimStore {
    /// Create a store over `pool`, running migrations
    pub fn new(pool: Pool<SqliteConnectionManager>, policy: ClaimPolicy) -> ClaimResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self { pool, policy: Arc::new(policy) })
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, policy: ClaimPolicy) -> ClaimResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::new(manager)?;
        Self::new(pool, policy)
    }

    /// In-memory store; a single pooled connection keeps one database
    pub fn memory(policy: ClaimPolicy) -> ClaimResult<Self> {
        let pool = Pool::builder().max_size(1).build(SqliteConnectionManager::memory())?;
        Self::new(pool, policy)
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// Run `op` against this store on the blocking thread pool
    ///
    /// Pool checkout and SQLite I/O never run on a runtime worker.
    pub async fn run_blocking<T, F>(&self, op: F) -> ClaimResult<T>
    where
        F: FnOnce(&ClaimStore) -> ClaimResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| ClaimError::Task(e.to_string()))?
    }

    fn conn(&self) -> ClaimResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Store a claim if the allow-list accepts it
    ///
    /// Returns true only if a new record was written.
    pub fn add_claim(
        &self,
        identity: &Identity,
        claim: &str,
        claim_type: ClaimType,
    ) -> ClaimResult<bool> {
        if claim.is_empty() || !self.policy.allows(claim_type, claim) {
            debug!(identity = %identity, claim_type = %claim_type, "Claim not in allow-list");
            return Ok(false);
        }

        self.grant_claim(identity, claim, claim_type)
    }

    /// Store a claim without consulting the allow-list
    pub(crate) fn grant_claim(
        &self,
        identity: &Identity,
        claim: &str,
        claim_type: ClaimType,
    ) -> ClaimResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO claims (pubkey, claim, claim_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.as_str(),
                claim,
                claim_type.as_str(),
                Timestamp::now().as_secs() as i64
            ],
        )? > 0;

        if inserted {
            metrics::counter!("claims.granted", "type" => claim_type.as_str()).increment(1);
            info!(identity = %identity, claim_type = %claim_type, "Claim granted");
        }

        Ok(inserted)
    }

    /// Whether `identity` holds at least one non-empty claim
    pub fn has_valid_claim(&self, identity: &Identity) -> ClaimResult<bool> {
        let exists: bool = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM claims WHERE pubkey = ?1 AND claim <> '')",
            params![identity.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Claims held by `identity`
    pub fn claims_for(&self, identity: &Identity) -> ClaimResult<Vec<StoredClaim>> {
        self.query_claims(
            "SELECT pubkey, claim, claim_type, created_at FROM claims
             WHERE pubkey = ?1 ORDER BY created_at, claim",
            params![identity.as_str()],
        )
    }

    /// Every stored claim
    pub fn all_claims(&self) -> ClaimResult<Vec<StoredClaim>> {
        self.query_claims(
            "SELECT pubkey, claim, claim_type, created_at FROM claims
             ORDER BY pubkey, created_at, claim",
            params![],
        )
    }

    fn query_claims(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> ClaimResult<Vec<StoredClaim>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(pubkey, claim, claim_type, created_at)| {
                Ok(StoredClaim {
                    pubkey: parse_identity(&pubkey)?,
                    claim,
                    claim_type: claim_type.parse()?,
                    created_at: Timestamp::from_secs(created_at.max(0) as u64),
                })
            })
            .collect()
    }

    /// Issue a fresh single-use invite code for `issuer`
    pub fn issue_invite(&self, issuer: &Identity) -> ClaimResult<String> {
        let conn = self.conn()?;

        for _ in 0..INVITE_ATTEMPTS {
            let code = generate_invite_code();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO invites (code, issuer, created_at) VALUES (?1, ?2, ?3)",
                params![&code, issuer.as_str(), Timestamp::now().as_secs() as i64],
            )?;

            if inserted > 0 {
                metrics::counter!("invites.issued").increment(1);
                info!(issuer = %issuer, "Invite issued");
                return Ok(code);
            }
        }

        Err(ClaimError::InviteCollision(INVITE_ATTEMPTS))
    }

    /// Consume `code`, returning its issuer if it was outstanding
    pub fn redeem_invite(&self, code: &str) -> ClaimResult<Option<Identity>> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(None);
        }

        let issuer: Option<String> = self
            .conn()?
            .query_row(
                "DELETE FROM invites WHERE code = ?1 RETURNING issuer",
                params![&code],
                |row| row.get(0),
            )
            .optional()?;

        match issuer {
            Some(issuer) => {
                let issuer = parse_identity(&issuer)?;
                metrics::counter!("invites.redeemed").increment(1);
                info!(issuer = %issuer, "Invite redeemed");
                Ok(Some(issuer))
            }
            None => Ok(None),
        }
    }

    /// Outstanding invites
    pub fn invites(&self) -> ClaimResult<Vec<Invite>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT code, issuer, created_at FROM invites ORDER BY created_at, code")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(code, issuer, created_at)| {
                Ok(Invite {
                    code,
                    issuer: parse_identity(&issuer)?,
                    created_at: Timestamp::from_secs(created_at.max(0) as u64),
                })
            })
            .collect()
    }
}

impl fmt::Debug for ClaimStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimStore").field("policy", &self.policy).finish_non_exhaustive()
    }
}

fn parse_identity(value: &str) -> ClaimResult<Identity> {
    Identity::parse(value).map_err(|e| ClaimError::InvalidIdentity(e.to_string()))
}

/// Generate a random invite code
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-supplied invite code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
