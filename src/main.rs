use clap::Parser;
use futures_util::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Client, ResourceExt};
use optipod::cli::{Cli, Commands};
use optipod::cluster::KubeCluster;
use optipod::config::{self, Config, ConfigError};
use optipod::duration::parse_duration;
use optipod::events::{EventSink, KubeEventSink};
use optipod::metrics::polling::{KubeUsageSampler, PollingConfig};
use optipod::metrics::{ProviderDeps, ProviderRegistry};
use optipod::policy::validation::validate_on_create;
use optipod::policy::OptimizationPolicy;
use optipod::reconciler::{Reconciler, ReconcilerSettings, DEFAULT_METRICS_WINDOW};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> optipod::Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    log::debug!("loading configuration");
    let mut config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { path } => validate_manifest(&path),
        Commands::Run {
            dry_run,
            metrics_provider,
            prometheus_url,
            leader_election,
            reconcile_interval,
            annotation_prefix,
        } => {
            // Flags win over the config file.
            if dry_run {
                config.controller.dry_run = true;
            }
            if leader_election {
                config.controller.leader_election = true;
            }
            if let Some(provider) = metrics_provider {
                config.metrics.provider = provider;
            }
            if let Some(url) = prometheus_url {
                config.metrics.prometheus_url = Some(url);
            }
            if let Some(interval) = reconcile_interval {
                config.controller.reconcile_interval = interval;
            }
            if let Some(prefix) = annotation_prefix {
                config.annotations.prefix = prefix;
            }
            run_controller(config).await
        }
    }
}

/// Validate a policy manifest offline; exits non-zero on failure.
fn validate_manifest(path: &Path) -> optipod::Result<()> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let policy: OptimizationPolicy =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    match validate_on_create(&policy.spec) {
        Ok(()) => {
            println!("policy {} is valid", policy.name_any());
            Ok(())
        }
        Err(e) => {
            eprintln!("policy {} is invalid: {e}", policy.name_any());
            process::exit(1);
        }
    }
}

async fn run_controller(config: Config) -> optipod::Result<()> {
    // kube's rustls transport needs a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = Client::try_default().await?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));

    let sample_interval = parse_duration(&config.metrics.sample_interval)?;
    let deps = ProviderDeps {
        sampler: Arc::new(KubeUsageSampler::new(client.clone())),
        prometheus_url: config.metrics.prometheus_url.clone(),
        polling: PollingConfig {
            max_samples: config.metrics.max_samples,
            sample_interval,
        },
    };
    let providers = Arc::new(ProviderRegistry::new(
        deps,
        config.metrics.provider.clone(),
        config.metrics.fallback_provider.clone(),
    ));

    match providers.default_provider() {
        Ok(provider) => {
            if let Err(e) = provider.health_check().await {
                log::warn!(
                    "metrics provider {} failed its startup health check: {e}",
                    provider.name()
                );
            }
        }
        Err(e) => log::warn!("default metrics provider cannot be constructed: {e}"),
    }

    if config.controller.leader_election {
        log::info!("leader election enabled; lease management is delegated to the deployment");
    }
    if config.controller.dry_run {
        log::info!("global dry-run: Automatic policies will be skipped, not applied");
    }

    let events: Arc<dyn EventSink> = Arc::new(KubeEventSink::new(client.clone()));
    let settings = ReconcilerSettings {
        global_dry_run: config.controller.dry_run,
        default_interval: parse_duration(&config.controller.reconcile_interval)?,
        default_window: DEFAULT_METRICS_WINDOW,
        annotation_prefix: config.annotations.prefix.clone(),
    };
    let reconciler = Arc::new(Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        providers,
        events,
        settings,
    ));

    log::info!("optipod {} starting", optipod::VERSION);

    let policies: Api<OptimizationPolicy> = Api::all(client);
    Controller::new(policies, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            |policy: Arc<OptimizationPolicy>, reconciler: Arc<Reconciler>| async move {
                let namespace = policy.namespace().unwrap_or_default();
                let name = policy.name_any();
                let outcome = reconciler.reconcile(&namespace, &name).await?;
                Ok(match outcome.requeue_after {
                    Some(after) => Action::requeue(after),
                    None => Action::await_change(),
                })
            },
            |policy: Arc<OptimizationPolicy>, err: &optipod::Error, _reconciler| {
                log::warn!("reconcile of {} failed: {err}", policy.name_any());
                Action::requeue(Duration::from_secs(30))
            },
            reconciler,
        )
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => log::debug!("reconciled {}", object.name),
                Err(e) => log::debug!("controller error: {e}"),
            }
        })
        .await;

    log::info!("shutdown complete");
    Ok(())
}
