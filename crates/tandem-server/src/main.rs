mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use tandem_api::collab::{Collaborators, GoogleProvider, HttpMailer, StreamChat};
use tandem_api::credentials::TokenService;
use tandem_api::{AppStateInner, build_router};
use tandem_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tandem_api=debug,tower_http=debug".into()),
        )
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&cfg.db_path)?);

    let collab = collaborators(&cfg)?;
    let state = AppStateInner::new(db, TokenService::new(&cfg.jwt_secret), collab, cfg.api.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("Tandem server listening on {}", addr);
    info!("Allowed origins: {}", cfg.api.allowed_origins.join(", "));

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Real integrations where credentials are present, disabled stand-ins otherwise.
fn collaborators(cfg: &Config) -> anyhow::Result<Collaborators> {
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let mut collab = Collaborators::disabled();

    match &cfg.stream {
        Some(s) => collab.chat = Arc::new(StreamChat::new(http.clone(), s.api_key.clone(), &s.api_secret)),
        None => warn!("STREAM_API_KEY/STREAM_API_SECRET not set, chat sync disabled"),
    }
    match &cfg.mail {
        Some(m) => {
            collab.mailer = Arc::new(HttpMailer::new(http.clone(), m.api_url.clone(), m.api_key.clone(), m.from.clone()))
        }
        None => warn!("MAIL_API_URL/MAIL_API_KEY/MAIL_FROM not set, password reset mail disabled"),
    }
    match &cfg.google {
        Some(g) => {
            collab.identity = Arc::new(GoogleProvider::new(
                http,
                g.client_id.clone(),
                g.client_secret.clone(),
                g.callback_url.clone(),
            ))
        }
        None => warn!("Google OAuth credentials not set, sign-in with Google disabled"),
    }

    Ok(collab)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
