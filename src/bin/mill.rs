use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use millwright::debugch::DebugChannel;
use millwright::loader;
use millwright::phases;
use millwright::session::BuildSession;
use millwright::GlobalConfig;

#[derive(Parser)]
#[command(name = "mill", about = "incremental, parallel build orchestrator for C/assembly projects")]
struct Cli {
    /// Targets to build; defaults to `all` when none are named
    targets: Vec<String>,

    /// Force rebuild regardless of mtime
    #[arg(short = 'a', long = "all")]
    force_all: bool,

    /// Worker pool size; absent means single-threaded
    #[arg(short = 'j', long = "jobs", default_value = "1")]
    jobs: usize,

    /// Fail-fast on first action failure
    #[arg(short = 'q', long = "quit")]
    quit: bool,

    /// Enable a debug channel (may repeat)
    #[arg(short = 'd', long = "debug", value_name = "CHANNEL")]
    debug: Vec<String>,

    /// Silence the default channel
    #[arg(short = 'Q', long = "quiet")]
    quiet: bool,

    /// Path to a tool config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("mill {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // `-Q` silences the `default` channel (ordinary build-progress info
    // lines) without touching an explicit `RUST_LOG` override or the
    // warn/error levels that always surface.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.quiet { "warn" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GlobalConfig::load(cli.config.as_deref()).context("failed to load config")?;

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let base_dir = loader::discover_project_root(&cwd)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to locate project.toml")?;

    let jobs = cli.jobs.max(1);
    let mut session = BuildSession::new(base_dir.clone(), &config, jobs);
    session.quiet = cli.quiet;
    session.fail_fast = cli.quit;
    session.force_rebuild = cli.force_all;

    for name in &cli.debug {
        let channel: DebugChannel = name
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("invalid --debug channel")?;
        session.debug_channels.insert(channel);
    }

    loader::load_project(&mut session, &base_dir).map_err(|e| anyhow::anyhow!("{e}"))?;

    let report = phases::run_all(&mut session, &cli.targets, jobs).map_err(|e| anyhow::anyhow!("{e}"))?;

    if report.skipped > 0 || report.fail_fast_triggered {
        std::process::exit(1);
    }
    Ok(())
}
