// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `sdcadm update`

use clap::Args;
use sdc_clients::HttpClients;
use sdcadm_common::SdcadmError;
use sdcadm_update::generate;
use sdcadm_update::generate::Policy;
use sdcadm_update::resolve;
use sdcadm_update::resolve::RawChange;
use sdcadm_update::resolve::ResolveOptions;
use sdcadm_update::topology::Topology;
use sdcadm_update::ExecContext;
use sdcadm_update::SdcadmConfig;
use slog::Logger;

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// services or instances to update: "svc", "svc@image-uuid",
    /// "svc@version", or an instance uuid/alias.  With no arguments and
    /// without --all, a JSON change list is read from stdin.
    #[arg(value_name = "SERVICE")]
    services: Vec<String>,

    /// update every service to its latest image
    #[arg(long)]
    all: bool,

    /// with --all, skip these services
    #[arg(long, value_name = "SERVICE")]
    exclude: Vec<String>,

    /// update channel to pull images from
    #[arg(long, short = 'C', value_name = "CHANNEL")]
    channel: Option<String>,

    /// download the target images but do not touch any instance
    #[arg(long)]
    just_images: bool,

    /// go through the motions without making changes
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,

    /// reinstall instances even when they already run the target image
    #[arg(long)]
    force_same_image: bool,

    /// allow updating the rabbitmq service
    #[arg(long)]
    force_rabbitmq: bool,

    /// allow updating data-path services
    #[arg(long)]
    force_data_path: bool,

    /// skip the minimum-image-version requirement
    #[arg(long)]
    force_bypass_min_image: bool,

    /// number of concurrent per-server agent installs
    #[arg(long, short = 'j', value_name = "N")]
    concurrency: Option<usize>,
}

pub async fn run(
    args: &UpdateArgs,
    mut config: SdcadmConfig,
    log: &Logger,
) -> anyhow::Result<()> {
    if let Some(channel) = &args.channel {
        config.channel = Some(channel.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config.agent_install_concurrency = concurrency;
    }

    let clients = HttpClients::new(
        &config.sapi_url,
        &config.cnapi_url,
        &config.vmapi_url,
        &config.imgapi_url,
        log,
    );
    let topology = Topology::load(log, &clients).await?;
    let opts = ResolveOptions {
        all: args.all,
        exclude: args.exclude.clone(),
        channel: config.channel.clone(),
    };

    let changes = if !args.all && args.services.is_empty() {
        let raw: Vec<RawChange> = serde_json::from_reader(std::io::stdin())
            .map_err(|e| {
                SdcadmError::usage(format!(
                    "parsing change list from stdin: {}",
                    e
                ))
            })?;
        resolve::resolve_raw_changes(log, &raw, &opts, &topology, &clients)
            .await?
    } else {
        resolve::resolve_changes(
            log,
            &args.services,
            &opts,
            &topology,
            &clients,
        )
        .await?
    };

    let policy = Policy {
        force_same_image: args.force_same_image,
        force_rabbitmq: args.force_rabbitmq,
        force_data_path: args.force_data_path,
        force_bypass_min_image: args.force_bypass_min_image,
        just_images: args.just_images,
        fail_fast: false,
        channel: config.channel.clone(),
        agent_concurrency: config.agent_install_concurrency,
        rabbitmq_services: config.rabbitmq_services.clone(),
        data_path_services: config.data_path_services.clone(),
    };
    let plan = generate::gen_plan(log, changes, &topology, &policy)?;

    let ctx = ExecContext { clients, config, log: log.clone() };
    crate::confirm_and_execute(plan, ctx, args.dry_run, args.yes).await?;
    Ok(())
}
