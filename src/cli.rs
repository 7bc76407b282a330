use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "optipod")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Right-size Kubernetes workload resource requests")]
#[command(
    long_about = "A Kubernetes controller that observes optimization policies, collects per-container CPU and memory usage from a metrics backend, computes bounded resource recommendations, and applies them to running workloads while preserving field ownership."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a .optipod.toml configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity; repeat for debug (-vv) and trace (-vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence all logging, including warnings
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller against the current cluster
    Run {
        /// Never apply recommendations, even for Automatic policies
        #[arg(long)]
        dry_run: bool,

        /// Default metrics provider for policies that do not name one
        #[arg(long, value_name = "NAME")]
        metrics_provider: Option<String>,

        /// Prometheus endpoint for the range-query provider
        #[arg(long, value_name = "URL")]
        prometheus_url: Option<String>,

        /// Take a leadership lease before reconciling
        #[arg(long)]
        leader_election: bool,

        /// Default requeue interval (e.g. "5m")
        #[arg(long, value_name = "DURATION")]
        reconcile_interval: Option<String>,

        /// Prefix for annotations written to managed workloads
        #[arg(long, value_name = "PREFIX")]
        annotation_prefix: Option<String>,
    },

    /// Validate a policy manifest without touching the cluster
    Validate {
        /// Path to a YAML policy manifest
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

impl Cli {
    /// Wire env_logger to the -q/-v flags. Quiet beats verbose.
    pub fn init_logging(&self) {
        let level = match (self.quiet, self.verbose) {
            (true, _) => log::LevelFilter::Off,
            (false, 0) => log::LevelFilter::Warn,
            (false, 1) => log::LevelFilter::Info,
            (false, 2) => log::LevelFilter::Debug,
            (false, _) => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}
