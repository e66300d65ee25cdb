use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod routes;
mod services;

use config::{Config, LogFormat};
use services::credentials::CredentialStore;
use services::google::{CalendarProvider, GoogleCalendarClient};
use services::rooms::RoomRegistry;

pub struct AppState {
    pub config: Config,
    pub credentials: CredentialStore,
    pub provider: Arc<dyn CalendarProvider>,
    pub rooms: RoomRegistry,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ncal=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

fn rate_limit_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut resp = http::Response::new(Body::from(format!(
                "Too many requests, retry in {}s",
                wait_time
            )));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }

            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));

            resp
        }
        GovernorError::UnableToExtractKey => {
            let mut resp = http::Response::new(Body::from(
                "Unable to determine client IP for rate limiting",
            ));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, only Ctrl+C will stop the server: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    tracing::info!("Starting ncal room booking service");

    // Startup files are mandatory; a broken one must stop the process.
    let oauth = config.load_oauth_client()?;
    let credentials = CredentialStore::load(config.storage.tokens_path.clone())?;
    let rooms = RoomRegistry::load(&config.storage.rooms_path)?;
    let provider = GoogleCalendarClient::new(oauth)?;

    tracing::info!(
        "Loaded {} rooms and {} stored credentials",
        rooms.len(),
        credentials.len().await
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        credentials,
        provider: Arc::new(provider),
        rooms,
    });

    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let mut ncal_builder = GovernorConfigBuilder::default();
    ncal_builder.per_second(config.rate_limit.webhook_per_second.into());
    ncal_builder.burst_size(config.rate_limit.webhook_burst);
    ncal_builder.key_extractor(SmartIpKeyExtractor);
    ncal_builder.error_handler(rate_limit_response);
    let ncal_gov_conf = Arc::new(
        ncal_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build slash command governor config"))?,
    );

    // Background cleanup for limiter storage
    let ncal_cleaner = {
        let limiter = ncal_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("slash command rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let ncal_rate_layer = GovernorLayer {
        config: ncal_gov_conf.clone(),
    };

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::ncal::router().layer(ncal_rate_layer))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, no longer accepting connections");
        }
    }

    thread_shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = ncal_cleaner.join() {
        tracing::warn!("Rate limiter cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
