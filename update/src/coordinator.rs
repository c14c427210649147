// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plan execution
//!
//! Runs a plan's procedures strictly in order, fail-fast, bracketed by the
//! execution lock and a history record.  Dry runs and no-op plans touch
//! nothing: no lock, no history, no backend mutation.

use chrono::Utc;
use sdcadm_common::SdcadmError;
use sdcadm_types::HistoryRecord;
use slog::crit;
use slog::info;
use slog::warn;
use uuid::Uuid;

use crate::history::HistoryStore;
use crate::lock;
use crate::plan::Plan;
use crate::procedures::ExecContext;

/// Per-run execution options
#[derive(Clone, Debug)]
pub struct ExecOptions {
    /// print what would run, mutate nothing
    pub dry_run: bool,
    /// recorded in the history record
    pub username: String,
}

/// Executes `plan`, returning the UUID of the history record written for
/// it (`None` for dry runs and no-op plans).
pub async fn execute_plan(
    ctx: &ExecContext,
    plan: &Plan,
    history: &HistoryStore,
    options: &ExecOptions,
) -> Result<Option<Uuid>, SdcadmError> {
    if plan.is_noop() {
        info!(ctx.log, "nothing to do; all targets are up to date");
        return Ok(None);
    }

    if options.dry_run {
        info!(ctx.log, "dry run; no changes will be made");
        for (i, proc) in plan.procs.iter().enumerate() {
            info!(ctx.log, "would execute";
                "step" => format!("{}/{}", i + 1, plan.procs.len()),
                "procedure" => proc.summarize(),
            );
        }
        info!(ctx.log, "dry run complete; no changes were made");
        return Ok(None);
    }

    let guard = lock::acquire(
        &ctx.config.lock_path(),
        &options.username,
        &ctx.log,
    )?;

    let mut record = HistoryRecord {
        uuid: Uuid::nil(),
        username: options.username.clone(),
        started: Utc::now(),
        finished: None,
        changes: plan.changes.clone(),
        error: None,
    };
    let record_uuid = history.save(&mut record)?;

    let mut result = run_procedures(ctx, plan).await;

    record.finished = Some(Utc::now());
    record.error = result.as_ref().err().map(|e| e.to_string());
    if let Err(finalize_error) = history.update(&record) {
        // An unfinalized record is how interrupted runs are detected, so
        // failing to finalize is serious.  It must not mask the execution
        // error, though.
        crit!(ctx.log, "failed to finalize history record";
            "record" => %record_uuid,
            "error" => %finalize_error,
        );
        if result.is_ok() {
            result = Err(finalize_error);
        }
    }

    // Same rule for the lock: a failed release is reported, but the
    // procedure outcome wins.
    if let Err(release_error) = guard.release() {
        warn!(ctx.log, "failed to release the execution lock";
            "error" => %release_error,
        );
        if result.is_ok() {
            result = Err(release_error);
        }
    }

    result.map(|()| Some(record_uuid))
}

async fn run_procedures(
    ctx: &ExecContext,
    plan: &Plan,
) -> Result<(), SdcadmError> {
    let total = plan.procs.len();
    for (i, proc) in plan.procs.iter().enumerate() {
        info!(ctx.log, "executing procedure";
            "step" => format!("{}/{}", i + 1, total),
            "procedure" => proc.summarize(),
        );
        proc.execute(ctx).await?;
    }
    info!(ctx.log, "plan execution complete"; "procedures" => total);
    Ok(())
}
