use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use chrono::Local;
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use onlooker::config::{Config, load_config, load_config_from_path};
use onlooker::export::{self, artifact_basename};
use onlooker::logging;
use onlooker::scheduler::Scheduler;
use onlooker::session_log::{SessionHeader, SessionLog};
use onlooker::system::collector::Collector;
use onlooker::system::history::TimeSeriesStore;
use onlooker::system::platform::{self, AttachedProcess, NativeSource};

#[derive(Parser)]
#[command(
    name = "onlooker",
    about = "Record memory and CPU usage of a process tree until the root process exits"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Directory for the log, JSON and CSV artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Observe an already running process instead of launching one
    #[arg(long, conflicts_with = "command")]
    attach: Option<u32>,

    /// Program to launch and observe, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required_unless_present = "attach")]
    command: Vec<OsString>,
}

/// The root of the observed tree, as the waiter thread sees it.
enum Monitored {
    Launched(Child),
    Attached(platform::Attached),
}

impl Monitored {
    fn pid(&self) -> u32 {
        match self {
            Monitored::Launched(child) => child.id(),
            Monitored::Attached(process) => process.pid(),
        }
    }

    fn wait(self) -> Result<Option<i32>> {
        match self {
            Monitored::Launched(mut child) => Ok(child.wait()?.code()),
            Monitored::Attached(process) => Ok(process.wait()),
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);

    let monitored = launch_or_attach(&cli)?;
    let pid = monitored.pid();
    tracing::info!(pid, "observing");

    let output_dir = config.general.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .wrap_err_with(|| format!("failed to create {}", output_dir.display()))?;
    let basename = artifact_basename(&Local::now(), pid);

    let collector = Collector::new(NativeSource::new(), pid, std::process::id())
        .with_session_log(open_session_log(&config, &output_dir.join(format!("{basename}.log"))))
        .log_process_list_changes(config.general.log_process_list_changes);
    let handle = Scheduler::new(collector, config.poll_interval())
        .spawn()
        .wrap_err("failed to start polling thread")?;

    let exit_code = monitored.wait()?;
    match exit_code {
        Some(code) => tracing::info!(pid, code, "process exited"),
        None => tracing::info!(pid, "process exited"),
    }

    let collector = handle
        .stop_and_join()
        .map_err(|_| eyre!("polling thread panicked"))?;
    let (store, mut log) = collector.into_parts();
    log.flush();
    drop(log);

    tracing::info!(
        processes = store.len(),
        samples = store.sample_count(),
        "collection finished"
    );
    write_artifacts(&store, &config, &output_dir, &basename);

    std::process::exit(exit_code.unwrap_or(0));
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    config.apply_env();
    if let Some(ms) = cli.poll_interval {
        config.general.poll_interval_ms = ms;
    }
    if let Some(ref dir) = cli.output_dir {
        config.general.output_dir = dir.clone();
    }

    config
}

fn launch_or_attach(cli: &Cli) -> Result<Monitored> {
    if let Some(pid) = cli.attach {
        let process = platform::attach(pid).wrap_err_with(|| format!("failed to attach to pid {pid}"))?;
        return Ok(Monitored::Attached(process));
    }

    let (program, args) = cli
        .command
        .split_first()
        .ok_or_else(|| eyre!("no program given"))?;
    tracing::debug!(?program, ?args, "launching");
    let child = Command::new(program)
        .args(args)
        .spawn()
        .wrap_err_with(|| format!("failed to launch {}", program.to_string_lossy()))?;
    Ok(Monitored::Launched(child))
}

fn open_session_log(config: &Config, path: &Path) -> SessionLog {
    if !config.general.session_log {
        return SessionLog::disabled();
    }
    match SessionLog::create(path) {
        Ok(mut log) => {
            log.header(&SessionHeader::capture(std::process::id()));
            log
        }
        Err(err) => {
            tracing::error!(error = %err, "continuing without session log");
            SessionLog::disabled()
        }
    }
}

/// Each artifact is attempted even if an earlier one failed.
fn write_artifacts(store: &TimeSeriesStore, config: &Config, dir: &Path, basename: &str) {
    let json_path = dir.join(format!("{basename}.json"));
    match export::dump_json(store, config.export.peak_metric, &json_path) {
        Ok(()) => tracing::info!(path = %json_path.display(), "wrote json"),
        Err(err) => tracing::error!(error = %err, "json artifact failed"),
    }

    let csv_path = dir.join(format!("{basename}.csv"));
    match export::dump_csv(store, config.export.csv_options(), &csv_path) {
        Ok(()) => tracing::info!(path = %csv_path.display(), "wrote csv"),
        Err(err) => tracing::error!(error = %err, "csv artifact failed"),
    }
}
