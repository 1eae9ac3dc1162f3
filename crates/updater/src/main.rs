use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use sitewatch_core::mailbox::FsSignalMailbox;
use sitewatch_core::updater::{UpdateOutcome, UpdatePolicy, Updater};
use sitewatch_core::window::{offset_from_hours, UpdateWindow};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod git;
mod process;

use config::UpdaterConfig;
use git::GitCli;
use process::CommandProcessManager;

#[derive(Debug, Parser)]
#[command(name = "sitewatch-updater", version, about = "Pulls upstream changes and asks watchers to restart")]
struct Cli {
    /// Working copy to keep up to date.
    #[arg(long, env = "SITEWATCH_REPO_DIR", default_value = ".")]
    repo_dir: PathBuf,

    /// Restart signal file shared with the watchers. Relative to the repo dir.
    #[arg(long, env = "SITEWATCH_SIGNAL_PATH", default_value = "data/restart-pending.json")]
    signal_path: PathBuf,

    /// Dependency manifest compared before and after a pull. Relative to the repo dir.
    #[arg(long, env = "SITEWATCH_MANIFEST", default_value = "Cargo.lock")]
    manifest: PathBuf,

    #[arg(long, env = "UPDATE_CHECK_INTERVAL_SECS", default_value_t = 300)]
    check_interval_secs: u64,

    /// First local hour (inclusive) in which updates are applied.
    #[arg(long, env = "SITEWATCH_WINDOW_START_HOUR", default_value_t = 7)]
    window_start_hour: u32,

    /// Local hour (exclusive) at which the update window closes. 24 means midnight.
    #[arg(long, env = "SITEWATCH_WINDOW_END_HOUR", default_value_t = 24)]
    window_end_hour: u32,

    /// Fixed UTC offset of the update window, in hours.
    #[arg(long, env = "SITEWATCH_UTC_OFFSET_HOURS", default_value_t = -3, allow_hyphen_values = true)]
    utc_offset_hours: i32,

    /// Seconds given to watchers to announce before the forced restart.
    #[arg(long, env = "SITEWATCH_GRACE_SECS", default_value_t = 20)]
    grace_secs: u64,

    #[arg(long, env = "SITEWATCH_RESTART_PROGRAM", default_value = "pm2")]
    restart_program: String,

    #[arg(long, env = "SITEWATCH_RESTART_ARGS", value_delimiter = ' ', default_value = "restart")]
    restart_args: Vec<String>,

    /// Appended to the restart command.
    #[arg(long, env = "SITEWATCH_PROCESS_GROUP", default_value = "ecosystem.config.cjs")]
    process_group: String,

    /// Log filter directive, e.g. `info` or `sitewatch_core=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::new(&cli.log))
        .with(fmt::layer().with_target(false))
        .init();

    let repo_dir = std::fs::canonicalize(&cli.repo_dir).unwrap_or_else(|_| cli.repo_dir.clone());

    let config = UpdaterConfig {
        signal_path: make_abs(&repo_dir, &cli.signal_path),
        manifest_path: make_abs(&repo_dir, &cli.manifest),
        repo_dir,
        check_interval_secs: cli.check_interval_secs.max(1),
        grace_secs: cli.grace_secs,
        window_start_hour: cli.window_start_hour,
        window_end_hour: cli.window_end_hour,
        utc_offset_hours: cli.utc_offset_hours,
        restart_program: cli.restart_program,
        restart_args: cli.restart_args,
        process_group: cli.process_group,
    };

    info!(?config, "starting updater");

    let updater = build_updater(&config);

    let mut tick = interval(Duration::from_secs(config.check_interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // The first tick completes immediately, so the first check runs at startup.
            _ = tick.tick() => {
                match updater.run_cycle(Utc::now()).await {
                    Ok(UpdateOutcome::Signaled(signal)) => {
                        info!(behind = signal.behind_count, "update applied; watchers signalled")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "update check failed"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

fn build_updater(config: &UpdaterConfig) -> Updater {
    let policy = UpdatePolicy {
        window: UpdateWindow::new(
            config.window_start_hour,
            config.window_end_hour,
            offset_from_hours(config.utc_offset_hours),
        ),
        manifest_path: config.manifest_path.clone(),
        grace: Duration::from_secs(config.grace_secs),
        process_group: config.process_group.clone(),
    };
    let processes = CommandProcessManager {
        program: config.restart_program.clone(),
        args: config.restart_args.clone(),
        cwd: config.repo_dir.clone(),
    };
    Updater::new(
        Arc::new(GitCli::new(&config.repo_dir)),
        Arc::new(FsSignalMailbox::new(&config.signal_path)),
        Arc::new(processes),
        policy,
    )
}

fn make_abs(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
