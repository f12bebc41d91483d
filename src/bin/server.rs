//! Acueducto live-update server
//!
//! Bridges Postgres change notifications on the `consumo` table to
//! Server-Sent Events so dashboards see new readings as they land.
//!
//! # Configuration
//!
//! Environment variables:
//! - `ACUEDUCTO_PORT`: Port to listen on (default: 3006)
//! - `DATABASE_URL`: Postgres connection string. Without it the server
//!   still starts but the feed never emits anything.
//! - `ACUEDUCTO_NOTIFY_CHANNEL`: Channel to `LISTEN` on (default: consumo_channel)
//! - `ACUEDUCTO_FEED_CAPACITY`: Events buffered per client before the
//!   oldest are dropped (default: 64)
//! - `ACUEDUCTO_INSTALL_TRIGGER`: Create the notify trigger on startup
//!   (default: false)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /consumo/events`: Live consumption feed (`text/event-stream`)

use std::net::SocketAddr;
use std::sync::Arc;

use acueducto::server::{
    install_notify_trigger, router, NotificationBridge, PgChangeListener, DEFAULT_CHANNEL,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 3006;
const DEFAULT_FEED_CAPACITY: usize = 64;

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    database_url: Option<String>,
    channel: String,
    feed_capacity: usize,
    install_trigger: bool,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("ACUEDUCTO_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let channel = std::env::var("ACUEDUCTO_NOTIFY_CHANNEL")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        let feed_capacity = std::env::var("ACUEDUCTO_FEED_CAPACITY")
            .ok()
            .and_then(|c| c.parse().ok())
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_FEED_CAPACITY);

        let install_trigger = std::env::var("ACUEDUCTO_INSTALL_TRIGGER")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            port,
            database_url,
            channel,
            feed_capacity,
            install_trigger,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acueducto_server=info,acueducto=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bridge = Arc::new(NotificationBridge::new(
        config.channel.clone(),
        config.feed_capacity,
    ));

    match &config.database_url {
        Some(url) => match PgPoolOptions::new().max_connections(2).connect_lazy(url) {
            Ok(pool) => {
                if config.install_trigger {
                    if let Err(e) = install_notify_trigger(&pool, &config.channel).await {
                        tracing::error!(error = %e, "Failed to install notify trigger");
                    }
                }
                bridge.spawn(Arc::new(PgChangeListener::new(pool)));
            }
            Err(e) => {
                tracing::error!(error = %e, "Invalid DATABASE_URL, live feed disabled");
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, live feed disabled");
        }
    }

    let app = router(bridge).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
