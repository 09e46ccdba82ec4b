use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursedesk::{
    clock::{Clock, SystemClock},
    config::Config,
    db,
    notify::{Dispatcher, HttpMailer, JobQueue, PgQueue},
    routes,
    scheduler::ReminderScheduler,
    store::{PgStore, Store},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "coursedesk=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config.database_url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgQueue::new(pool.clone()));
    let mailer = HttpMailer::from_config(&config)?;
    if config.mail_relay().is_none() {
        tracing::info!(env = ?config.app_env, "emails will only be logged");
    }

    let state = AppState::new(store.clone(), queue.clone(), clock.clone(), config.page_limits);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(ReminderScheduler::new(
        store,
        state.activities.clone(),
        state.notifier.clone(),
        clock.clone(),
        config.reminder_timezone,
        config.deadline_hours,
    ));
    let scheduler_task = tokio::spawn(scheduler.run(config.reminder_schedule.clone(), shutdown_rx.clone()));

    let dispatcher = Arc::new(Dispatcher::new(queue, Arc::from(mailer), clock, config.send_timeout));
    let dispatcher_task = tokio::spawn(dispatcher.run(config.worker_poll_interval, shutdown_rx));

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = tokio::join!(scheduler_task, dispatcher_task);
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
