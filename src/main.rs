//! hookgate - webhook authentication gateway served over a Unix socket.

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookgate::audit::AuditLogger;
use hookgate::auth::{
    CachingSecretResolver, MemoryNonceStore, ReplayGuard, SecretResolver, StaticSecretResolver,
};
use hookgate::config::Settings;
use hookgate::error::GatewayError;
use hookgate::events::{MulticastHook, VerificationHook};
use hookgate::pipeline::{PipelineConfig, VerificationPipeline};
use hookgate::socket::{SocketListener, DRAIN_TIMEOUT};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Socket path: {}", settings.socket.path.display());
    info!("Log level: {}", settings.logging.level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}

/// Secret table, optionally behind a TTL cache.
enum Secrets {
    Plain(Arc<StaticSecretResolver>),
    Cached(Arc<CachingSecretResolver<StaticSecretResolver>>),
}

impl Secrets {
    fn load(settings: &Settings) -> Result<Self, GatewayError> {
        let table = StaticSecretResolver::from_file(&settings.security.secrets_path)?;
        info!(
            path = %settings.security.secrets_path.display(),
            secrets = table.len(),
            "Signing secrets loaded"
        );

        let ttl = settings.security.secret_cache_ttl_seconds;
        Ok(if ttl > 0 {
            info!(ttl_seconds = ttl, "Secret caching enabled");
            Self::Cached(Arc::new(CachingSecretResolver::new(
                table,
                Duration::from_secs(ttl),
            )))
        } else {
            Self::Plain(Arc::new(table))
        })
    }

    fn resolver(&self) -> Arc<dyn SecretResolver> {
        match self {
            Self::Plain(table) => Arc::clone(table) as Arc<dyn SecretResolver>,
            Self::Cached(cache) => Arc::clone(cache) as Arc<dyn SecretResolver>,
        }
    }

    fn reload(&self, path: &Path) -> Result<usize, GatewayError> {
        match self {
            Self::Plain(table) => table.reload(path),
            Self::Cached(cache) => {
                let count = cache.inner().reload(path)?;
                cache.clear();
                Ok(count)
            }
        }
    }
}

async fn async_main(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Arc::new(settings);

    let secrets = Secrets::load(&settings)?;

    let local_store = Arc::new(MemoryNonceStore::new(settings.replay.max_entries));
    let sweep_interval = Duration::from_secs(settings.replay.sweep_interval_seconds);
    let sweep = local_store.start_sweep(sweep_interval);
    let replay_guard = ReplayGuard::from_settings(&settings, Arc::clone(&local_store)).await?;

    let mut hooks = MulticastHook::new();
    if settings.audit.enabled {
        match AuditLogger::new(&settings.audit.log_path) {
            Ok(logger) => {
                info!(path = %settings.audit.log_path.display(), "Audit logging enabled");
                hooks.add_subscriber(Arc::new(logger));
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %settings.audit.log_path.display(),
                    "Failed to create audit logger, audit logging disabled"
                );
            }
        }
    } else {
        info!("Audit logging disabled");
    }

    let mut pipeline = VerificationPipeline::new(
        PipelineConfig::from_settings(&settings),
        secrets.resolver(),
        replay_guard,
    );
    if hooks.subscriber_count() > 0 {
        pipeline = pipeline.with_hook(Arc::new(hooks) as Arc<dyn VerificationHook>);
    }
    let pipeline = Arc::new(pipeline);

    let listener = SocketListener::bind(Arc::clone(&settings), pipeline).await?;

    let shutdown = Arc::new(Notify::new());
    let shutdown_for_run = Arc::clone(&shutdown);

    loop {
        tokio::select! {
            result = listener.run(Arc::clone(&shutdown_for_run)) => {
                if let Err(e) = result {
                    error!(error = %e, "Socket listener failed");
                    return Err(e.into());
                }
                break;
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                shutdown.notify_waiters();

                if listener.wait_for_drain(DRAIN_TIMEOUT).await {
                    info!("Graceful shutdown complete");
                } else {
                    warn!(
                        "Shutdown timeout after {}s, some connections may be terminated",
                        DRAIN_TIMEOUT.as_secs()
                    );
                }
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading signing secrets...");
                match secrets.reload(&settings.security.secrets_path) {
                    Ok(count) => info!(secrets = count, "Signing secrets reloaded"),
                    Err(e) => {
                        error!(error = %e, "Failed to reload secrets, keeping existing table");
                    }
                }
            }
        }
    }

    sweep.stop().await;

    let metrics = listener.metrics();
    info!(
        connections = metrics.total_connections(),
        accepted = metrics.accepted(),
        rejected = metrics.rejected(),
        "Gateway stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut sighup) => {
            sighup.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

fn print_help() {
    println!(
        r#"{} {}
Webhook authentication gateway: verifies signatures, nonces and timestamps
for webhooks handed over a Unix socket.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: /etc/hookgate/hookgate.toml]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGHUP                 Reload the secrets file
    SIGTERM, SIGINT        Stop accepting and drain connections
"#,
        NAME, VERSION, NAME
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "/etc/hookgate/hookgate.toml".to_string()
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
