use anyhow::Result;
use clap::Parser;
use cmdarr::cache::SqliteCacheManager;
use cmdarr::config::{ConfigStore, SqliteConfigStore};
use cmdarr::library_cache::LibraryCacheManager;
use cmdarr::log_fanout::LogFanout;
use cmdarr::registry::ExecutionRegistry;
use cmdarr::scheduler::{CommandConfigStore, Scheduler};
use cmdarr::server::{self, AppState, ConnectionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cmdarr orchestrates a fleet of music-library, media-server, and
/// recommendation services. This binary wires up storage, the scheduler, and
/// the HTTP/WebSocket surface; the actual service clients are supplied by
/// whoever embeds this crate against its `service_client` traits.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the sqlite databases. Overrides the persisted
    /// DB_DIR setting so the config store itself can be located.
    #[clap(long)]
    db_dir: Option<PathBuf>,

    /// HTTP/WebSocket port.
    #[clap(short, long, default_value_t = 3080)]
    port: u16,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).with_env_var("LOG_LEVEL").from_env_lossy())
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli_args = CliArgs::parse();

    // Phase 1: storage + config. Everything downstream reads its own
    // settings (ports, TTLs, cooldowns) from the config store rather than
    // from CLI flags, per §9's two-phase init note.
    let db_dir = cli_args.db_dir.unwrap_or_else(|| PathBuf::from("./data"));
    std::fs::create_dir_all(&db_dir)?;

    info!(?db_dir, "opening config store");
    let config: Arc<dyn ConfigStore> = Arc::new(SqliteConfigStore::new(db_dir.join("config.db"))?);

    if let Ok(missing) = config.validate_required() {
        if !missing.is_empty() {
            error!(?missing, "required configuration is missing; continuing with defaults where possible");
        }
    }

    // Phase 2: everything else.
    let cache = Arc::new(SqliteCacheManager::new(db_dir.join("cache.db"))?);
    let memory_ceiling_mb = config.get_int("LIBRARY_CACHE_MEMORY_CEILING_MB").unwrap_or(500);
    let library_cache = Arc::new(LibraryCacheManager::new(db_dir.join("cache.db"), memory_ceiling_mb as usize * 1024 * 1024)?);

    let registry = Arc::new(ExecutionRegistry::new(db_dir.join("config.db"))?);
    let recovered = registry.recover_after_restart()?;
    if recovered > 0 {
        info!(recovered, "marked stale running executions failed after restart");
    }

    let command_config_store = Arc::new(CommandConfigStore::new(db_dir.join("config.db"))?);
    let max_parallel = config.get_int("MAX_PARALLEL_COMMANDS").unwrap_or(3).max(1) as usize;
    let shutdown_grace = Duration::from_secs(config.get_int("SHUTDOWN_GRACE_SECONDS").unwrap_or(30).max(0) as u64);

    // No concrete service clients are wired here: the ten per-service API
    // clients are an integration concern outside this crate's scope (§4.4);
    // whoever deploys cmdarr registers `ScheduledCommand` implementations
    // backed by their own clients against this same `Scheduler`.
    let scheduler = Arc::new(Scheduler::new(registry.clone(), command_config_store, max_parallel, shutdown_grace));

    let retention_per_command = config.get_int("EXECUTION_RETENTION_PER_COMMAND").unwrap_or(50).max(0) as usize;
    let cleanup_daemon = scheduler.spawn_cleanup_daemon(retention_per_command);

    let discovery_artifacts_dir =
        PathBuf::from(config.get("DISCOVERY_ARTIFACT_DIR").unwrap_or_else(|_| "./data/import_lists".to_string()));
    std::fs::create_dir_all(&discovery_artifacts_dir)?;

    let state = AppState {
        config,
        cache,
        library_cache,
        registry,
        scheduler: scheduler.clone(),
        log_fanout: Arc::new(LogFanout::new()),
        connections: Arc::new(ConnectionRegistry::new()),
        connectivity_probes: Arc::new(Vec::new()),
        new_release_source: None,
        manager: None,
        metadata: None,
        discovery_artifacts_dir,
        start_time: Instant::now(),
        build_hash: format!("{}-{}", env!("APP_VERSION"), env!("GIT_HASH")),
    };

    info!(port = cli_args.port, "cmdarr ready");

    let result = tokio::select! {
        result = server::run_server(state, cli_args.port) => {
            info!(?result, "http server stopped");
            result
        }
        _ = scheduler.clone().run() => {
            info!("scheduler stopped");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            scheduler.stop().await;
            Ok(())
        }
    };

    cleanup_daemon.abort();
    result
}
