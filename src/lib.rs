pub mod models;
pub mod services;
pub mod api;

use anyhow::Context;
use services::config_store::{AppConfig, ConfigStore};
use services::oracle::{RemoteOracle, ScoringOracle};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn startup_elapsed_ms() -> u128 {
    PROCESS_START
        .get()
        .map(|t| t.elapsed().as_millis())
        .unwrap_or(0)
}

fn env_truthy(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE")
    )
}

/// Initialize logging system with timestamped log files
pub fn init_logging() {
    let disable_file_log = env_truthy("PPLDETECTOR_DISABLE_FILE_LOG");
    let disable_cleanup = env_truthy("PPLDETECTOR_DISABLE_LOG_CLEANUP");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if disable_file_log {
        init_console_only_logging(env_filter);
        info!("File logging disabled via PPLDETECTOR_DISABLE_FILE_LOG");
        return;
    }

    let logs_dir = match std::env::var("PPLDETECTOR_LOG_DIR") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => get_logs_dir(),
    };

    if let Err(e) = fs::create_dir_all(&logs_dir) {
        eprintln!("Failed to create logs directory: {}", e);
        init_console_only_logging(env_filter);
        info!("Falling back to console-only logging (log dir not writable)");
        return;
    }

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let log_filename = format!("ppl-detector_{}.log", timestamp);

    // One file per session; writes go through a background worker.
    let file_appender = rolling::never(&logs_dir, &log_filename);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(file_guard);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions))
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    info!("=== ppl-detector Started ===");
    info!("Log file: {}/{}", logs_dir.display(), log_filename);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if !disable_cleanup {
        std::thread::spawn(move || {
            cleanup_old_logs(&logs_dir, 30);
        });
    }
}

/// Get the logs directory path
fn get_logs_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("logs")
    }

    #[cfg(not(debug_assertions))]
    {
        if let Some(data_dir) = dirs::data_local_dir() {
            return data_dir.join("ppl-detector").join("logs");
        }
        PathBuf::from("logs")
    }
}

fn cleanup_old_logs(logs_dir: &Path, keep: usize) {
    let mut entries: Vec<_> = match fs::read_dir(logs_dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(_) => return,
    };

    entries.retain(|e| {
        let name = e.file_name().to_string_lossy().to_string();
        name.starts_with("ppl-detector_") && name.ends_with(".log")
    });

    if entries.len() <= keep {
        return;
    }

    entries.sort_by_key(|e| {
        e.metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let remove_count = entries.len().saturating_sub(keep);
    for entry in entries.into_iter().take(remove_count) {
        let _ = fs::remove_file(entry.path());
    }
}

fn init_console_only_logging(env_filter: EnvFilter) {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions))
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}

/// Load `config.json` from the config directory, then apply environment overrides
pub fn load_config() -> anyhow::Result<AppConfig> {
    let mut config = match ConfigStore::default_config_dir() {
        Some(dir) => {
            let store = ConfigStore::new(dir);
            let config = store
                .load()
                .with_context(|| format!("loading {}", store.config_file().display()))?;
            info!(path = %store.config_file().display(), "config.loaded");
            config
        }
        None => {
            warn!("No config directory available, using defaults");
            AppConfig::default()
        }
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Connect the process-wide oracle described by the config
pub fn connect_oracle(config: &AppConfig) -> anyhow::Result<Arc<dyn ScoringOracle>> {
    let oracle = RemoteOracle::connect(
        &config.oracle.base_url,
        Duration::from_secs(config.oracle.timeout_secs),
        config.oracle.context_limit,
    )
    .with_context(|| format!("connecting to scoring oracle at {}", config.oracle.base_url))?;

    if oracle.model_id() != config.oracle.model_id {
        warn!(
            expected = %config.oracle.model_id,
            actual = %oracle.model_id(),
            "oracle.model_mismatch"
        );
    }
    Ok(Arc::new(oracle))
}

pub fn run() -> anyhow::Result<()> {
    PROCESS_START.get_or_init(Instant::now);

    let logging_t0 = Instant::now();
    init_logging();
    info!(
        startup_ms = startup_elapsed_ms(),
        logging_ms = logging_t0.elapsed().as_millis(),
        "logging.initialized"
    );

    let config = load_config()?;

    // The blocking HTTP client must be built outside the async runtime.
    let oracle = connect_oracle(&config)?;
    let detector = config
        .detection
        .build_detector(oracle.max_context_length())
        .context("building detector")?;
    info!(
        model = %oracle.model_id(),
        context_limit = detector.estimator().context_limit(),
        stride = detector.estimator().stride(),
        truncate = detector.estimator().truncates(),
        "detector.ready"
    );

    // Keep one handle so the blocking client is released outside the runtime.
    let oracle_handle = Arc::clone(&oracle);
    let state = Arc::new(api::AppState::new(oracle, detector, &config.server));
    let app = api::router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
            .await
            .with_context(|| format!("binding {}", config.server.bind_addr))?;
        info!(
            startup_ms = startup_elapsed_ms(),
            addr = %config.server.bind_addr,
            "server.listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serving HTTP")
    })?;

    drop(runtime);
    drop(oracle_handle);
    info!("=== ppl-detector Exited ===");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
