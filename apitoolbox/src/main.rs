// Demo server: loads settings, opens the shared pool, creates the schema and
// serves every built-in endpoint until Ctrl+C or SIGTERM.

use std::{net::SocketAddr, sync::Arc};

use axum::http::HeaderValue;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{fmt, EnvFilter};

use apitoolbox::{
    db_registry::DbRegistry,
    mail::{Mailer, SmtpMailer},
    middleware::SessionPool,
    models::Metadata,
    server,
    settings::Settings,
    utils::EngineOptions,
};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,axum=info,tower_http=info,sqlx=warn"));
    if std::env::var("APITOOLBOX_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        fmt().with_env_filter(env_filter).json().init();
    } else {
        fmt().with_env_filter(env_filter).compact().init();
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = Settings::load()?;

    let registry = DbRegistry::global();
    registry.recreate(&settings.db_registry);
    let options = EngineOptions { max_connections: settings.database.max_connections, pre_ping: settings.database.pre_ping };
    let pool = registry.get_or_create(&settings.database.url, options).await?;
    let sessions = SessionPool::registry(registry, settings.database.url.clone(), options);

    let metadata = Arc::new(Metadata::standard()?);
    metadata.create_all(&pool).await?;

    let mailer = settings
        .email
        .sender
        .as_ref()
        .map(|_| Arc::new(SmtpMailer::from_settings(&settings.email)) as Arc<dyn Mailer>);

    let router = server::app(&settings, sessions, metadata, mailer)?
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&settings.server.cors_origins));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, database = %settings.database.url, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    if let Some(pool) = registry.get(&settings.database.url) {
        pool.close().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
}
