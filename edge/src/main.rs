mod aggregator;
mod config;
mod metrics_defs;
mod observability;

use aggregator::Aggregator;
use clap::{Args, Parser};
use config::{Config, ConfigError, FileConfig, KnativeConfig};
use observability::ObservabilityError;
use provider::file::FileProvider;
use provider::knative::manifests::{self, ManifestError};
use provider::knative::{KnativeOptions, KnativeProvider, NamespaceScope, Store, StoreClient};
use provider::{Message, ProviderLoop};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Snapshots waiting for the aggregator. Providers block once it is full.
const CONFIGURATION_CHANNEL_CAPACITY: usize = 16;

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(Parser)]
#[command(name = "edge", about = "Builds edge routing configuration from its providers")]
enum CliCommand {
    /// Runs the providers and the aggregator until interrupted.
    Run(ConfigArgs),
    /// Checks a configuration file and exits.
    Validate(ConfigArgs),
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Observability(#[from] ObservabilityError),
    #[error("cannot load manifests: {0}")]
    Manifests(#[from] ManifestError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Run(args) => run(&args.config_file_path),
        CliCommand::Validate(args) => validate(&args.config_file_path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<Config, CliError> {
    let config = Config::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn validate(path: &Path) -> Result<(), CliError> {
    load_config(path)?;
    println!("{} is valid", path.display());
    Ok(())
}

fn run(path: &Path) -> Result<(), CliError> {
    let config = load_config(path)?;
    let _sentry = observability::init_logging(&config.logging);
    observability::init_metrics(config.metrics.as_ref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), CliError> {
    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(CONFIGURATION_CHANNEL_CAPACITY);
    let mut tasks = JoinSet::new();

    if let Some(knative) = &config.providers.knative {
        spawn_knative(knative, &mut tasks, tx.clone(), &shutdown)?;
    }
    if let Some(file) = &config.providers.file {
        spawn_file(file, &mut tasks, tx.clone(), &shutdown);
    }
    // The aggregator stops once every provider dropped its sender.
    drop(tx);

    let (aggregator, _live) = Aggregator::new();
    tasks.spawn(aggregator.run(rx, shutdown.clone()));

    tracing::info!("Edge started");
    shutdown_signal().await?;
    shutdown.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            tracing::error!(error = %err, "Task failed");
        }
    }
    tracing::info!("Edge stopped");
    Ok(())
}

fn spawn_knative(
    config: &KnativeConfig,
    tasks: &mut JoinSet<()>,
    tx: mpsc::Sender<Message>,
    shutdown: &CancellationToken,
) -> Result<(), CliError> {
    let store = Arc::new(Store::new());
    // Fails startup on an unreadable directory or manifest. Later reloads only log.
    manifests::reload(&store, &config.manifests_dir)?;

    {
        let store = store.clone();
        let dir = config.manifests_dir.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            if let Err(err) = manifests::sync_dir(store, dir, shutdown).await {
                tracing::error!(error = %err, "Manifest synchronisation stopped");
            }
        });
    }

    let client = StoreClient::new(
        store,
        NamespaceScope::from_namespaces(config.namespaces.clone()),
        config.label_selector()?,
    );
    let options = KnativeOptions {
        public_entrypoints: config.public_entrypoints.clone(),
        public_service: config.public_service.clone(),
        private_entrypoints: config.private_entrypoints.clone(),
        private_service: config.private_service.clone(),
    };
    let provider = ProviderLoop::new(
        KnativeProvider::new(client, options),
        config.throttle_duration(),
    );

    let shutdown = shutdown.clone();
    tasks.spawn(async move { provider.run(tx, shutdown).await });
    Ok(())
}

fn spawn_file(
    config: &FileConfig,
    tasks: &mut JoinSet<()>,
    tx: mpsc::Sender<Message>,
    shutdown: &CancellationToken,
) {
    let provider = ProviderLoop::new(
        FileProvider::new(config.path.clone(), config.watch),
        config.throttle_duration(),
    );
    let shutdown = shutdown.clone();
    tasks.spawn(async move { provider.run(tx, shutdown).await });
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<(), CliError> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    tracing::info!("Shutdown signal received");
    Ok(())
}
