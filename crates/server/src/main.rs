use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use kg_coaching::{CoachingConfig, CoachingEngine, CoachingStore};
use kg_coordinator::{Coordinator, CoordinatorConfig, GraceDeadlineWorker};
use kg_core::SystemClock;
use kg_gateway::{AdminTokenStore, AppState, GatewayConfig};
use kg_habits::HabitStore;
use kg_medications::{MedicationRegistry, NoopExtractor};
use kg_reminders::ReminderStore;
use kg_scheduler::{Scheduler, SchedulerConfig};
use kg_server::config::KiloGuardianConfig;
use kg_server::ServerError;
use kg_state::StateStore;
use kg_state_memory::MemoryStateStore;
use tracing::info;

/// Kilo Guardian server: a single binary hosting every adherence component
/// behind one HTTP gateway.
#[derive(Parser, Debug)]
#[command(name = "kg-server", about = "Kilo Guardian adherence server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "kiloguardian.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config: KiloGuardianConfig = if Path::new(&cli.config).exists() {
        let contents =
            std::fs::read_to_string(&cli.config).map_err(|source| ServerError::ConfigRead {
                path: cli.config.clone(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ServerError::ConfigParse {
            path: cli.config.clone(),
            source,
        })?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        KiloGuardianConfig::default()
    };

    // Air-gapped by design: no external state backend, no audit sink, no
    // network calls during medication extraction. Every component below is
    // wired in-process; the gateway is the only thing that speaks HTTP.
    let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let bus = Arc::new(kg_bus::EventBus::new());

    let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
    let habits = Arc::new(HabitStore::new(Arc::clone(&state)));

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&state),
        Arc::clone(&reminders),
        Arc::clone(&habits),
        Arc::clone(&bus),
        CoordinatorConfig {
            snooze_minutes: config.coordinator.snooze_minutes,
            max_snoozes: config.coordinator.max_snoozes,
        },
    ));

    let extractor: Arc<dyn kg_medications::AsyncExtractor> = Arc::new(NoopExtractor);
    let medications = Arc::new(MedicationRegistry::new(
        Arc::clone(&state),
        Arc::clone(&coordinator),
        Arc::clone(&bus),
        extractor,
    ));

    let coaching = Arc::new(CoachingEngine::new(
        CoachingStore::new(Arc::clone(&state)),
        Arc::clone(&bus),
        CoachingConfig::default(),
    ));

    let tokens = Arc::new(AdminTokenStore::new(Arc::clone(&state)));
    let admin_token = std::env::var("KG_ADMIN_TOKEN").unwrap_or_else(|_| config.gateway.admin_token.clone());
    tokens.bootstrap(&admin_token).await?;

    // Recover anything left `fired` from a previous run before serving a
    // single request: past-deadline reminders are marked missed immediately,
    // everything else gets re-armed on the grace worker.
    let grace = Arc::new(GraceDeadlineWorker::new());
    let still_pending = coordinator.recover_on_startup(chrono::Utc::now()).await?;
    let recovered = still_pending.len();
    grace.arm_many(still_pending);
    if recovered > 0 {
        info!(count = recovered, "re-armed grace deadlines from previous run");
    }

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&reminders),
        Arc::clone(&coordinator),
        Arc::clone(&grace),
        Arc::new(SystemClock),
        SchedulerConfig {
            poll_interval: std::time::Duration::from_secs(config.scheduler.poll_interval_seconds),
            batch_size: config.scheduler.batch_size,
            queue_capacity: config.scheduler.queue_capacity,
        },
    ));

    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run());
    let grace_coordinator = Arc::clone(&coordinator);
    let grace_handle = tokio::spawn(Arc::clone(&grace).run(grace_coordinator));

    let gateway_config = Arc::new(GatewayConfig {
        request_timeout: std::time::Duration::from_secs(config.gateway.request_timeout_seconds),
        health_check_timeout: std::time::Duration::from_secs(
            config.gateway.health_check_timeout_seconds,
        ),
        admin_token,
    });

    let app_state = AppState {
        medications,
        reminders,
        habits,
        coordinator,
        coaching,
        tokens,
        config: gateway_config,
    };
    let app = kg_gateway::router(app_state);

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    info!(address = %addr, "kg-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.abort();
    grace_handle.abort();

    info!("kg-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
