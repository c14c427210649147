// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI for administering a datacenter deployment: plan-based service
//! updates, rollback of a previous update, and the audit history of both.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::Subcommand;
use sdcadm_common::FileKv;
use sdcadm_common::SdcadmError;
use sdcadm_update::coordinator;
use sdcadm_update::coordinator::ExecOptions;
use sdcadm_update::history::HistoryStore;
use sdcadm_update::ExecContext;
use sdcadm_update::Plan;
use sdcadm_update::SdcadmConfig;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Logger;
use slog_error_chain::InlineErrorChain;

mod history;
mod rollback;
mod update;

#[derive(Debug, Parser)]
#[command(
    name = "sdcadm",
    about = "Administer a datacenter deployment",
    version
)]
struct Sdcadm {
    /// path to a JSON configuration file (compiled-in defaults otherwise)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    /// log verbosity
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        default_value = "info",
        value_parser = parse_log_level
    )]
    log_level: slog::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Update services (or individual instances) to new images
    Update(update::UpdateArgs),
    /// Roll back a previously executed update plan
    Rollback(rollback::RollbackArgs),
    /// Show the audit history of updates and rollbacks
    History(history::HistoryArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Sdcadm::parse();
    let config = match SdcadmConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("sdcadm: error: {}", error);
            return ExitCode::from(1);
        }
    };
    let log = make_logger(&config, args.log_level);

    match run(&args, config, &log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            slog::error!(log, "command failed";
                "error" => InlineErrorChain::new(error.as_ref()));
            eprintln!("sdcadm: error: {:#}", error);
            if is_usage(&error) {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

async fn run(
    args: &Sdcadm,
    config: SdcadmConfig,
    log: &Logger,
) -> anyhow::Result<()> {
    match &args.command {
        Commands::Update(update_args) => {
            update::run(update_args, config, log).await
        }
        Commands::Rollback(rollback_args) => {
            rollback::run(rollback_args, config, log).await
        }
        Commands::History(history_args) => {
            history::run(history_args, config, log)
        }
    }
}

fn is_usage(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<SdcadmError>()
            .is_some_and(SdcadmError::is_usage)
    })
}

fn parse_log_level(value: &str) -> Result<slog::Level, String> {
    value
        .parse()
        .map_err(|()| format!("unknown log level \"{}\"", value))
}

/// Builds the root logger: human-readable output on stderr, plus a durable
/// copy of each run under the run directory when it is writable.
fn make_logger(config: &SdcadmConfig, level: slog::Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let term = slog_term::FullFormat::new(decorator).build().fuse();

    let drain: Box<dyn Drain<Ok = (), Err = slog::Never> + Send> =
        match open_log_file(config) {
            Ok(file) => {
                let decorator = slog_term::PlainDecorator::new(file);
                let file_drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Box::new(slog::Duplicate(term, file_drain).fuse())
            }
            // e.g. the run directory is not writable by this user; the
            // terminal drain still works
            Err(_) => Box::new(term),
        };
    let drain = drain.filter_level(level).ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!(FileKv))
}

fn open_log_file(config: &SdcadmConfig) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(&config.run_dir)?;
    std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(config.run_dir.join("sdcadm.log"))
}

fn username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

fn confirm(prompt: &str) -> Result<bool, SdcadmError> {
    use std::io::Write;

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush().map_err(|e| {
        SdcadmError::internal(format!("writing to stdout: {}", e))
    })?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).map_err(|e| {
        SdcadmError::internal(format!("reading confirmation: {}", e))
    })?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Shared tail of `update` and `rollback`: show the plan, confirm, persist
/// it, and hand it to the execution coordinator.
async fn confirm_and_execute(
    plan: Plan,
    ctx: ExecContext,
    dry_run: bool,
    yes: bool,
) -> Result<(), SdcadmError> {
    if plan.is_noop() {
        println!("Up-to-date.");
        return Ok(());
    }

    println!("This operation will make the following changes:");
    println!("{}", plan.summarize());

    if !yes && !dry_run && !confirm("Would you like to continue?")? {
        println!("Aborting.");
        return Ok(());
    }

    if !dry_run {
        let path = plan.save(&ctx.config.updates_dir())?;
        info!(ctx.log, "wrote plan file"; "path" => %path);
    }

    let history = HistoryStore::new(ctx.config.history_dir(), &ctx.log);
    let record = coordinator::execute_plan(
        &ctx,
        &plan,
        &history,
        &ExecOptions { dry_run, username: username() },
    )
    .await?;
    if let Some(uuid) = record {
        println!("Completed successfully ({}).", uuid);
    }
    Ok(())
}
