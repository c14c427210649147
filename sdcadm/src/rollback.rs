// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `sdcadm rollback`

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use sdc_clients::HttpClients;
use sdcadm_update::rollback;
use sdcadm_update::ExecContext;
use sdcadm_update::Plan;
use sdcadm_update::SdcadmConfig;
use slog::Logger;

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// path of the plan file to roll back
    #[arg(long, short = 'f', value_name = "PLAN")]
    file: Utf8PathBuf,

    /// acknowledge that rollback reinstalls prior images only: it does not
    /// undo data migrations or check version dependencies
    #[arg(long)]
    force: bool,

    /// go through the motions without making changes
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,
}

pub async fn run(
    args: &RollbackArgs,
    config: SdcadmConfig,
    log: &Logger,
) -> anyhow::Result<()> {
    let plan_file = Plan::load_file(&args.file)
        .context("loading the plan to roll back")?;

    let clients = HttpClients::new(
        &config.sapi_url,
        &config.cnapi_url,
        &config.vmapi_url,
        &config.imgapi_url,
        log,
    );
    // gen_rollback_plan applies the force gate before its first backend
    // request, so a refused rollback never talks to any collaborator
    let plan = rollback::gen_rollback_plan(
        log,
        &plan_file,
        &clients,
        args.force,
    )
    .await?;

    let ctx = ExecContext { clients, config, log: log.clone() };
    crate::confirm_and_execute(plan, ctx, args.dry_run, args.yes).await?;
    Ok(())
}
