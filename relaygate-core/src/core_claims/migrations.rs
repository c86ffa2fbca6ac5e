//! Database migrations for the claim store
//!
//! Versioned migrations tracked in the `claims_schema_version` table. Each
//! migration runs in its own transaction.

use super::error::ClaimError;
use crate::core_event::Timestamp;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::info;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Claims and invites",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS claims (
                pubkey TEXT NOT NULL,               -- canonical hex identity
                claim TEXT NOT NULL,
                claim_type TEXT NOT NULL CHECK(claim_type IN ('relay', 'group', 'invite')),
                created_at INTEGER NOT NULL,
                PRIMARY KEY (pubkey, claim, claim_type)
            );

            CREATE TABLE IF NOT EXISTS invites (
                code TEXT PRIMARY KEY,
                issuer TEXT NOT NULL,               -- canonical hex identity
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_invites_issuer ON invites(issuer);
        "#,
    }]
}

fn current_version(pool: &Pool<SqliteConnectionManager>) -> Result<i32, ClaimError> {
    let conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS claims_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM claims_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Apply every pending migration
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<(), ClaimError> {
    let current = current_version(pool)?;
    let pending: Vec<_> = get_migrations().into_iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let conn = pool.get()?;
    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO claims_schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, Timestamp::now().as_secs() as i64],
        )?;
        tx.commit()?;

        info!(version = migration.version, description = migration.description, "Applied claim store migration");
    }

    Ok(())
}

/// Latest available schema version
pub fn latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}
