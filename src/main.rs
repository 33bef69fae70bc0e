use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use crate::backend::config::BackendConfig;
use crate::backend::local::LocalEngine;
use crate::intake::process::JobIntake;
use crate::intake::watch::watch_incoming;
use crate::job::record::JobType;
use crate::queue::shared::{QueueSet, SharedQueue};
use crate::spool::tree::SpoolDirs;
use crate::spooler::signal::interrupted;
use crate::spooler::spool::JobSpooler;

/// Execution backend and the applications it runs
mod backend;
/// Turn new files in the spool into queued jobs
mod intake;
/// Parse and represent job descriptions
mod job;
/// Logger setup
mod logging;
/// Fair per-user job queues
mod queue;
/// The spooling directory tree
mod spool;
/// The event loop dispatching jobs
mod spooler;

/// HRM queue manager: spools job files, queues them fairly per user and runs
/// them on an execution backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory of the spooling tree (spool/ and queue/ live below)
    #[arg(short, long)]
    spooldir: PathBuf,
    /// Backend configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Backend resource to run jobs on
    #[arg(short, long)]
    resource: Option<String>,
    /// More log output, repeat for even more (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Interval of the spooler loop in milliseconds
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);
    info!("terve! HRM queue manager starting up :)");

    let startup = SpoolDirs::setup(&args.spooldir).with_context(|| {
        format!("Can't set up spooling directories in '{}'", args.spooldir.display())
    })?;
    if !startup.orphaned.is_empty() {
        warn!("{} job file(s) left over in 'cur' are not queued again.", startup.orphaned.len());
    }
    let dirs = startup.dirs;

    let mut queues = QueueSet::new();
    let hucore_status = dirs.status_file(JobType::Hucore);
    queues.insert(SharedQueue::new(JobType::Hucore).with_status_file(hucore_status));

    let config = match &args.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::local_default(&dirs.base),
    };
    let resource = config.select(args.resource.as_deref())?;
    let engine = LocalEngine::new(resource);
    let mut spooler = JobSpooler::new(queues.clone(), dirs.clone(), engine)
        .context("Backend resource directory unclean, refusing to start")?
        .with_tick(Duration::from_millis(args.tick_ms));

    let (watcher, incoming) = watch_incoming(&dirs.new)
        .with_context(|| format!("Can't watch '{}' for new job files", dirs.new.display()))?;
    let intake = JobIntake::new(queues.clone(), dirs.clone());
    // files that arrived before the watcher was running
    for path in dirs.list_new()? {
        info!("Processing job file found at startup: {}", path.display());
        intake.process_jobfile(&path).await;
    }
    let intake_task = tokio::spawn(intake.run(incoming));

    spooler.spool(interrupted()).await;

    drop(watcher);
    if let Err(err) = intake_task.await {
        warn!("Job intake ended abnormally: {}", err);
    }
    for queue in queues.iter().filter(|queue| !queue.is_empty()) {
        warn!(
            "Queue '{}' still holds {} job(s): {:?}",
            queue.jobtype(),
            queue.len(),
            queue.joblist()
        );
        if let Some(report) = queue.report() {
            info!("Queue '{}':\n{}", queue.jobtype(), report);
        }
    }
    info!("HRM queue manager finished.");
    Ok(())
}
