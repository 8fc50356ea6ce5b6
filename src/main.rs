/*!
 * scx-host - Main Entry Point
 *
 * Loads one of the sample schedulers into the simulated kernel, drives it
 * with a synthetic workload, and reports statistics until interrupted.
 */

use clap::Parser;
use miette::IntoDiagnostic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use scx_host::{
    init_tracing, ExtError, ExtensionImage, HostConfig, PolicyConfig, PolicyKind, Session, SimulationBackend,
    TaskProfile, Workload,
};

/// Virtual time simulated per workload tick
const TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Parser)]
#[command(name = "scx-host", version, about = "Run a sample sched_ext scheduler")]
struct Args {
    /// Scheduler to attach
    #[arg(long, value_enum, default_value_t = PolicyKind::Fifo)]
    policy: PolicyKind,

    /// Print statistics every interval
    #[arg(short, long)]
    verbose: bool,

    /// Time slice in nanoseconds
    #[arg(long)]
    slice_ns: Option<u64>,

    /// Time slice of the priority queue in nanoseconds
    #[arg(long)]
    prio_slice_ns: Option<u64>,

    /// Slice usage (percent) under which a task counts as I/O-bound
    #[arg(long)]
    prio_usage_pct: Option<u64>,

    /// Smoothing constant of the moving average, in [0, 1]
    #[arg(long)]
    weighted_avg_mult: Option<f64>,

    /// Usage percentage assumed before a task's first sample
    #[arg(long)]
    initial_usage_pct: Option<f64>,

    /// Number of simulated CPUs
    #[arg(long, default_value_t = 4)]
    cpus: u32,

    /// Number of synthetic tasks (half CPU-bound, half I/O-bound)
    #[arg(long, default_value_t = 8)]
    tasks: u32,

    /// Stop after this many milliseconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_ms: Option<u64>,
}

impl Args {
    fn policy_config(&self) -> miette::Result<PolicyConfig> {
        let mut config = PolicyConfig::from_env()?;
        config.verbose |= self.verbose;
        if let Some(v) = self.slice_ns {
            config.slice_ns = v;
        }
        if let Some(v) = self.prio_slice_ns {
            config.prio_slice_ns = v;
        }
        if let Some(v) = self.prio_usage_pct {
            config.prio_slice_usage_pct = v;
        }
        if let Some(v) = self.weighted_avg_mult {
            config.weighted_avg_mult = v;
        }
        if let Some(v) = self.initial_usage_pct {
            config.initial_usage_pct = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.policy_config()?;

    info!(policy = %args.policy, cpus = args.cpus, tasks = args.tasks, "scx-host starting");

    let backend = Arc::new(SimulationBackend::new(args.cpus));
    let host = HostConfig::default().with_cpus(args.cpus);
    let mut session = Session::new(backend.clone(), host, config);
    info!(session = %session.id(), "Session created");

    let image = ExtensionImage::simulated(args.policy.manifest())?;
    session.load(&image)?;
    session.attach_scheduler(args.policy)?;

    let workload = Workload::spawn(backend.class().clone(), &TaskProfile::mixed(1, args.tasks))
        .map_err(ExtError::from)?;
    let stop = Arc::new(AtomicBool::new(false));
    let driver = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("workload".into())
            .spawn(move || drive(workload, &stop))
            .into_diagnostic()?
    };

    info!("Press Ctrl+C to exit");
    let duration = args.duration_ms.map(Duration::from_millis);
    session
        .run(async move {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                    }
                }
            }
        })
        .await?;

    stop.store(true, Ordering::Relaxed);
    if driver.join().is_err() {
        warn!("Workload thread panicked");
    }
    if let Some(exit) = backend.class().exit_info() {
        warn!(policy = %exit.policy, reason = %exit.reason, "Scheduler was aborted");
    }

    info!("scx-host stopped");
    Ok(())
}

fn drive(mut workload: Workload, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = workload.run_for(TICK.as_nanos() as u64) {
            error!(error = %e, "Workload stopped");
            return;
        }
        thread::sleep(TICK);
    }
}
