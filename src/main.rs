use sageline::application::no_show::NoShowMonitor;
use sageline::application::settlement::settlement_channel;
use sageline::application::signaling::CallSignalingCoordinator;
use sageline::config::Config;
use sageline::domain::appointment::AppointmentRepository;
use sageline::domain::call::ledger::SessionLedger;
use sageline::domain::payment::PaymentGateway;
use sageline::domain::presence::PresenceTracker;
use sageline::infrastructure::payments::{InMemoryPaymentGateway, RpcPaymentGateway};
use sageline::infrastructure::transport::{HmacCredentialIssuer, LoopbackTransport};
use sageline::interface::api::websocket::{EventBroadcaster, WsNotifier};
use sageline::interface::api::{
    build_router, init_metrics, update_active_calls, update_pending_requests, AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use sageline::infrastructure::persistence::{
    create_pool, run_migrations, DatabaseConfig, PgAppointmentRepository, PgSessionLedger,
};

#[cfg(not(feature = "postgres"))]
use sageline::infrastructure::appointments::InMemoryAppointmentRepository;
#[cfg(not(feature = "postgres"))]
use sageline::infrastructure::ledger::InMemorySessionLedger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Sageline call orchestration service");

    let config = Config::load()?;
    info!(
        "Configuration loaded: listening on {}:{}",
        config.server.host, config.server.port
    );

    // Ledger and appointment store
    #[cfg(feature = "postgres")]
    let (ledger, appointments): (Arc<dyn SessionLedger>, Arc<dyn AppointmentRepository>) = {
        info!("Initializing database connection...");
        let db_config = DatabaseConfig {
            url: config.database.url.clone(),
            ..DatabaseConfig::default()
        };
        let pool = create_pool(&db_config).await?;

        info!("Running database migrations...");
        run_migrations(&pool).await?;
        info!("Database migrations completed");

        (
            Arc::new(PgSessionLedger::new(pool.clone())),
            Arc::new(PgAppointmentRepository::new(pool)),
        )
    };

    #[cfg(not(feature = "postgres"))]
    let (ledger, appointments): (Arc<dyn SessionLedger>, Arc<dyn AppointmentRepository>) = {
        info!("Using in-memory ledger and appointment store");
        (
            Arc::new(InMemorySessionLedger::new()),
            Arc::new(InMemoryAppointmentRepository::new()),
        )
    };

    // Realtime delivery
    let broadcaster = Arc::new(EventBroadcaster::default());
    let notifier = Arc::new(WsNotifier::new(Arc::clone(&broadcaster)));

    // Payment collaborator
    let payments: Arc<dyn PaymentGateway> = if config.wallet.rpc_url.is_empty() {
        info!("Wallet RPC URL not set; using in-process gateway");
        Arc::new(InMemoryPaymentGateway::new())
    } else {
        info!("Connecting wallet gateway at {}", config.wallet.rpc_url);
        Arc::new(RpcPaymentGateway::new(&config.wallet.rpc_url)?)
    };

    // Settlement worker
    let (settlement, settlement_worker) = settlement_channel(
        Arc::clone(&payments),
        Arc::clone(&appointments),
        notifier.clone() as Arc<dyn sageline::domain::notification::Notifier>,
        config.settlement.settlement_config(),
    );
    tokio::spawn(settlement_worker.run());

    // Core services
    let coordinator = Arc::new(CallSignalingCoordinator::new(
        Arc::clone(&ledger),
        Arc::new(LoopbackTransport::new()),
        Arc::new(HmacCredentialIssuer::new(
            config.credentials.signing_secret.as_bytes(),
        )),
        notifier.clone(),
        settlement.clone(),
        config.signaling.signaling_config(),
    ));

    let presence = Arc::new(PresenceTracker::new(Duration::from_secs(
        config.presence.cache_ttl_secs,
    )));

    let monitor = Arc::new(NoShowMonitor::new(
        Arc::clone(&appointments),
        settlement,
        notifier,
        config.no_show.no_show_config(),
    ));

    // Periodic jobs: away sweep, request expiry, no-show polling
    {
        let presence = Arc::clone(&presence);
        let interval = Duration::from_secs(config.presence.away_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let demoted = presence.sweep_away();
                if demoted > 0 {
                    info!(demoted, "away sweep demoted idle experts");
                }
            }
        });
    }

    {
        let ledger = Arc::clone(&ledger);
        let window = chrono::Duration::seconds(config.signaling.ringing_window_secs as i64);
        let interval = Duration::from_secs(config.signaling.expiry_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match ledger.expire_stale_requests(window).await {
                    Ok(expired) if expired > 0 => {
                        info!(expired, "expiry sweep expired unanswered requests");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                }
            }
        });
    }

    tokio::spawn(Arc::clone(&monitor).run());
    info!("Background jobs started: away sweep, request expiry, no-show monitor");

    // Metrics
    let prometheus_handle = init_metrics();
    {
        let coordinator = Arc::clone(&coordinator);
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                update_active_calls(coordinator.active_call_count().await);
                if let Ok(pending) = ledger.count_pending_requests().await {
                    update_pending_requests(pending);
                }
            }
        });
    }

    // HTTP/WS interface
    let state = AppState {
        coordinator,
        presence,
        monitor,
        ledger,
        broadcaster: Arc::clone(&broadcaster),
    };
    let app = build_router(state, prometheus_handle, broadcaster);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await?;
    info!(
        "API server started on {}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
