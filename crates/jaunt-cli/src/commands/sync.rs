use std::env;
use std::path::Path;

use jaunt_core::config::SyncSettings;
use jaunt_core::models::ConflictId;
use jaunt_core::sync::{CancelToken, HttpSyncTransport, ResolutionOp, SyncCoordinator};

use crate::cli::ResolveOp;
use crate::commands::common::{format_time, open_database, open_journal};
use crate::error::CliError;

pub async fn run_sync(
    endpoint: Option<String>,
    db_path: &Path,
    device: &str,
) -> Result<(), CliError> {
    let endpoint = endpoint
        .or_else(|| env::var("JAUNT_SYNC_URL").ok())
        .filter(|url| !url.trim().is_empty())
        .ok_or(CliError::SyncNotConfigured)?;

    let transport = HttpSyncTransport::new(endpoint)?;
    let db = open_database(db_path)?;
    let coordinator = SyncCoordinator::new(transport, db, SyncSettings::for_device(device));

    let report = coordinator.sync(&CancelToken::never()).await?;
    println!(
        "Pulled {} changes, pushed {}, {} conflicts raised",
        report.pulled_applied,
        report.pushed_accepted,
        report.pull_conflicts + report.push_conflicts
    );
    if report.parked > 0 {
        println!(
            "{} pushes hit transient errors and will retry next sync",
            report.parked
        );
    }
    if report.held_back > 0 {
        println!(
            "{} changes are waiting on conflict resolution (`jaunt conflicts`)",
            report.held_back
        );
    }
    Ok(())
}

pub fn run_conflicts(as_json: bool, db_path: &Path, device: &str) -> Result<(), CliError> {
    let journal = open_journal(db_path, device)?;
    let conflicts = journal.pending_conflicts()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts pending.");
        return Ok(());
    }

    println!("Resolve oldest first with `jaunt resolve <id> <op>`:");
    for conflict in &conflicts {
        println!(
            "{}  {}  {} {}  local v{} ({}) vs remote v{} ({})",
            conflict.id,
            format_time(conflict.detected_at_ms),
            conflict.kind.as_str(),
            conflict.entity,
            conflict.local.version,
            conflict.local.device_id,
            conflict.remote.version,
            conflict.remote.device_id,
        );
    }
    Ok(())
}

pub fn run_resolve(id: &str, op: ResolveOp, db_path: &Path, device: &str) -> Result<(), CliError> {
    let conflict_id: ConflictId = id
        .parse()
        .map_err(|_| CliError::InvalidConflictId(id.to_string()))?;
    let journal = open_journal(db_path, device)?;

    let op = match op {
        ResolveOp::KeepLocal => ResolutionOp::KeepLocal,
        ResolveOp::KeepRemote => ResolutionOp::KeepRemote,
        ResolveOp::Merge => ResolutionOp::Merge,
    };
    journal.resolve_conflict(&conflict_id, op)?;
    println!("Resolved {conflict_id}; run `jaunt sync` to push the result.");
    Ok(())
}
