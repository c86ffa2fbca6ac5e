//! Subcommands
//!
//! Every command builds the access engine from configuration, does one
//! thing and writes plain, tab-separated output.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use relaygate_core::config::Config;
use relaygate_core::core_acl::AccessControl;
use relaygate_core::core_event::{EventSource, JsonlEventSource};
use relaygate_core::core_identity::Identity;
use relaygate_core::core_roster::{spawn_sync_loop, SyncReport};
use relaygate_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Time the sync loop gets to finish its cycle on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decide whether an identity has access
    Check {
        identity: Identity,

        /// Run one sync cycle over this JSON-lines event file first
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Issue an invite code on behalf of an identity
    Invite { issuer: Identity },

    /// Redeem (and consume) an invite code, printing its issuer
    Redeem { code: String },

    /// Print stored claims and outstanding invites
    Dump,

    /// Run one sync cycle over a JSON-lines event file and print the roster
    Sync {
        #[arg(long)]
        events: PathBuf,
    },

    /// Keep the roster in sync from a JSON-lines event file until interrupted
    Watch {
        #[arg(long)]
        events: PathBuf,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Check { .. } => "check",
            Command::Invite { .. } => "invite",
            Command::Redeem { .. } => "redeem",
            Command::Dump => "dump",
            Command::Sync { .. } => "sync",
            Command::Watch { .. } => "watch",
        }
    }
}

fn engine(config: &Config, events: Option<&PathBuf>) -> Result<AccessControl> {
    let sources: Vec<Arc<dyn EventSource>> = match events {
        Some(path) => vec![Arc::new(JsonlEventSource::new(path)) as Arc<dyn EventSource>],
        None => Vec::new(),
    };
    AccessControl::from_config(config, sources).context("initializing access control")
}

async fn run_cycle(control: &AccessControl) -> Result<SyncReport> {
    match control.synchronizer().run_cycle().await {
        Some(report) => Ok(report),
        None => bail!("a sync cycle is already running"),
    }
}

/// Run `command`, writing results to `out`
pub async fn execute(command: Command, config: &Config, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Check { identity, events } => {
            let control = engine(config, events.as_ref())?;
            if events.is_some() {
                run_cycle(&control).await?;
            }
            match control.chain().granted_by(&identity).await {
                Some(provider) => writeln!(out, "granted\t{}", provider)?,
                None => writeln!(out, "denied")?,
            }
        }

        Command::Invite { issuer } => {
            let control = engine(config, None)?;
            let code = control.claims().run_blocking(move |s| s.issue_invite(&issuer)).await?;
            writeln!(out, "{}", code)?;
        }

        Command::Redeem { code } => {
            let control = engine(config, None)?;
            match control.claims().run_blocking(move |s| s.redeem_invite(&code)).await? {
                Some(issuer) => writeln!(out, "{}", issuer)?,
                None => bail!("unknown or already redeemed invite code"),
            }
        }

        Command::Dump => {
            let control = engine(config, None)?;
            let (claims, invites) = control
                .claims()
                .run_blocking(|s| Ok((s.all_claims()?, s.invites()?)))
                .await?;
            for claim in claims {
                writeln!(
                    out,
                    "claim\t{}\t{}\t{}\t{}",
                    claim.pubkey, claim.claim_type, claim.claim, claim.created_at
                )?;
            }
            for invite in invites {
                writeln!(out, "invite\t{}\t{}\t{}", invite.code, invite.issuer, invite.created_at)?;
            }
        }

        Command::Sync { events } => {
            let control = engine(config, Some(&events))?;
            let report = run_cycle(&control).await?;
            write_report(out, &report)?;
            for member in control.synchronizer().roster().members() {
                writeln!(out, "member\t{}", member)?;
            }
        }

        Command::Watch { events } => {
            if !config.sync.enabled {
                bail!("roster sync is disabled in the configuration");
            }
            let control = engine(config, Some(&events))?;

            let coordinator = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));
            let sync_loop = spawn_sync_loop(
                Arc::clone(control.synchronizer()),
                config.sync.interval,
                config.sync.run_on_start,
                coordinator.subscribe(),
            );
            let _signals = install_signal_handlers(Arc::clone(&coordinator));

            coordinator.wait_for_shutdown().await;
            coordinator.drain(vec![sync_loop]).await;

            let roster = control.synchronizer().roster();
            info!(members = roster.len(), watermark = %roster.watermark(), "Watch stopped");
            writeln!(out, "members\t{}", roster.len())?;
        }
    }

    Ok(())
}

fn write_report(out: &mut impl Write, report: &SyncReport) -> Result<()> {
    writeln!(out, "keys_ingested\t{}", report.keys_ingested)?;
    writeln!(out, "events_fetched\t{}", report.events_fetched)?;
    writeln!(out, "updates_applied\t{}", report.updates_applied)?;
    writeln!(out, "decrypt_failures\t{}", report.decrypt_failures)?;
    writeln!(out, "missing_keys\t{}", report.missing_keys)?;
    writeln!(out, "source_failures\t{}", report.source_failures)?;
    writeln!(out, "watermark\t{}", report.watermark)?;
    Ok(())
}
