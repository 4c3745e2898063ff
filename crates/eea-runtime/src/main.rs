// crates/eea-runtime/src/main.rs
// ============================================================================
// Binary: eea
// Description: Reference process wiring the core against an in-process bus,
// a SQLite store, and logging stand-ins for the provider/remediation
// collaborators the core does not specify.
// ============================================================================

//! Loads configuration, opens the store, and runs the core until `Ctrl-C`.
//! Rule/profile authoring, the HTTP/gRPC request surface, and real
//! provider clients are external collaborators spec.md §1 excludes from
//! the core; this binary starts with an empty catalog and a logging
//! provider stand-in so the wiring itself is exercised end-to-end.

use std::env;
use std::sync::Arc;

use eea_core::interfaces::MessageBus;
use eea_evaluator::DataSourceRegistry;
use eea_evaluator::PropertiesOnlyIngest;
use eea_evaluator::StaticCatalog;
use eea_runtime::Runtime;
use eea_runtime::provider::LoggingProviderClient;
use eea_store_sqlite::SqliteStore;
use eea_store_sqlite::SqliteStoreConfig;

/// Wires and runs the reference process until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config_path = env::args().nth(1);
    let config = eea_config::EeaConfig::load(config_path.as_deref().map(std::path::Path::new))?;

    let store = Arc::new(SqliteStore::open(&SqliteStoreConfig::new(&config.store.database_path))?);
    let bus: Arc<dyn MessageBus> = Arc::new(eea_bus::InProcessBus::new());

    let dispatcher =
        eea_actions::ActionDispatcher::new(Arc::new(LoggingProviderClient), Arc::new(eea_actions::LoggingRemediator));
    let runtime = Runtime::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::new(StaticCatalog::default()),
        Arc::new(DataSourceRegistry::new()),
        Arc::new(PropertiesOnlyIngest),
        Arc::new(dispatcher),
        &config,
    );
    runtime.register_consumer(bus.as_ref())?;

    tracing::info!(database_path = %config.store.database_path.display(), "eea runtime starting");

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_on_signal = Arc::clone(&shutdown);
    let bus_for_signal = Arc::clone(&bus);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown_on_signal.notify_waiters();
            let _ = bus_for_signal.close().await;
        }
    });

    let (bus_result, ()) = tokio::join!(bus.run(), runtime.run_flush_scheduler(shutdown));
    bus_result?;
    signal_task.abort();

    Ok(())
}
