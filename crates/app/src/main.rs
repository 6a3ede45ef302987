/// Marketplace Backend Application
///
/// Entry point of the marketplace business-rule engine. The application serves
/// the REST API for carts, orders, saved addresses and payment methods,
/// service appointments and notifications.
///
/// # Architecture
///
/// - Repository layer (PostgreSQL or in-memory) for data access
/// - Service layer for the business rules
/// - API layer for HTTP endpoints and metrics
/// - A background sweeper purging idle carts
///
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use app_config::{AppConfig, StoreBackend};
use memstore::MemoryStore;
use model::{Address, PaymentMethod};
use repository::{
    PgAppointmentsRepository, PgCartsRepository, PgFlaggedRepository, PgNotificationsRepository,
    PgOrdersRepository, PgProductCatalog,
};
use server::Server;
use service::{Backend, EngineSettings, HttpMailer, LogMailer, Mailer, Services};

const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize the tracing subscriber for logging; `RUST_LOG` overrides the default level.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_backend(config: &AppConfig) -> Result<Backend> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store, data is lost on restart");
            Ok(Backend::single(Arc::new(MemoryStore::new())))
        }
        StoreBackend::Postgres => {
            let pool = db::init_db_pool(config).await.context("Failed to initialize database")?;
            info!("Database initialized successfully");
            Ok(Backend {
                carts: Arc::new(PgCartsRepository::new(pool.clone())),
                orders: Arc::new(PgOrdersRepository::new(pool.clone())),
                addresses: Arc::new(PgFlaggedRepository::<Address>::new(pool.clone())),
                payment_methods: Arc::new(PgFlaggedRepository::<PaymentMethod>::new(pool.clone())),
                appointments: Arc::new(PgAppointmentsRepository::new(pool.clone())),
                notifications: Arc::new(PgNotificationsRepository::new(pool.clone())),
                catalog: Arc::new(PgProductCatalog::new(pool)),
            })
        }
    }
}

fn build_mailer(config: &AppConfig) -> Result<Arc<dyn Mailer>> {
    if config.mail_relay_url.is_empty() {
        info!("No mail relay configured, emails are logged only");
        return Ok(Arc::new(LogMailer));
    }
    let mailer = HttpMailer::new(config.mail_relay_url.clone(), MAIL_TIMEOUT)
        .context("Failed to create mail relay client")?;
    Ok(Arc::new(mailer))
}

fn engine_settings(config: &AppConfig) -> Result<EngineSettings> {
    let slot_step_minutes = u32::try_from(config.slot_step.as_secs() / 60)
        .ok()
        .filter(|m| *m > 0)
        .context("slot_step must be a positive number of minutes")?;
    if config.cart_sweep_interval.is_zero() {
        anyhow::bail!("cart_sweep_interval must be greater than zero");
    }
    if config.business_hours_start >= config.business_hours_end {
        anyhow::bail!("business_hours_start must be before business_hours_end");
    }

    Ok(EngineSettings {
        tax_rate: config.tax_rate,
        transition_policy: config.transition_policy,
        business_hours_start: config.business_hours_start,
        business_hours_end: config.business_hours_end,
        slot_step_minutes,
        mail_from: config.mail_from.clone(),
    })
}

/// Periodically purges carts idle for longer than `ttl` until `stop` flips.
async fn run_cart_sweeper(
    services: Arc<Services>,
    interval: Duration,
    ttl: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let ttl = chrono::Duration::from_std(ttl).context("cart_idle_ttl is out of range")?;
    let mut ticker = tokio::time::interval(interval);
    info!("Cart sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = services.carts.purge_idle(ttl).await {
                    error!("Cart sweep failed: {}", err);
                }
            }
            _ = stop.changed() => break,
        }
    }

    info!("Cart sweeper stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    info!("Marketplace Backend starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    let backend = build_backend(&config).await?;
    let mailer = build_mailer(&config)?;
    let settings = engine_settings(&config)?;
    let slot_minutes = settings.slot_step_minutes;
    let services = Arc::new(Services::new(backend, &settings, mailer));

    // Create a JoinSet to manage background tasks
    let mut tasks = JoinSet::new();
    let (stop_tx, stop_rx) = watch::channel(false);

    tasks.spawn(run_cart_sweeper(
        services.clone(),
        config.cart_sweep_interval,
        config.cart_idle_ttl,
        stop_rx,
    ));

    // Start HTTP server; returns once a shutdown signal has drained it
    let http_server = Server::new(config.http_port, services, slot_minutes)?;
    if let Err(err) = http_server.start(server::shutdown_signal()).await {
        error!("HTTP server error: {}", err);
    }

    // Stop background tasks
    let _ = stop_tx.send(true);
    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Err(err)) => error!("Background task failed: {}", err),
                Err(err) => error!("Task error: {}", err),
                Ok(Ok(())) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("Background tasks did not stop within {:?}", config.shutdown_timeout);
        tasks.abort_all();
    }

    info!("Application stopped");
    Ok(())
}
