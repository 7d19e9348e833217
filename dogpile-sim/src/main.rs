use dogpile::{FetcherConfig, LookupEvent, StoreFactory, TtlStore};
use dogpile_sim::{simulate_breakdown, ProductDatabase, SimulationPlan, Variant};
use shared::config::Config;
use std::sync::Arc;
use std::time::Duration;
use storage_engine::DefaultStoreFactory;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting cache stampede simulation");

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    info!(
        "Store: {:?}, stale policy: {:?}, default TTL: {:?}",
        config.store, config.stale_policy, config.default_ttl
    );

    let (events_tx, events_rx) = broadcast::channel(1024);
    tokio::spawn(log_events(events_rx));

    let plan = SimulationPlan {
        requesters: config.sim_requesters,
        ..SimulationPlan::default()
    };

    for variant in Variant::ALL {
        info!("Running {} variant with {} requesters", variant, plan.requesters);

        let store: Arc<dyn TtlStore<String, String>> =
            DefaultStoreFactory.create_from_config(&config);
        let database = Arc::new(
            ProductDatabase::new(config.sim_fetch_latency).with_jitter(Duration::from_millis(20)),
        );
        let ops = variant.build(
            store.clone(),
            database.clone(),
            FetcherConfig::from(&config),
            Some(events_tx.clone()),
        );

        let report = simulate_breakdown(ops, store, database, &plan).await;
        report.print_summary();
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!("Simulation completed");
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<LookupEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!("{} {}", event.kind(), event.key()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event log lagged, skipped {} events", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
