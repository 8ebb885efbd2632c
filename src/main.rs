// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! WolfHost — remote container and service control for the Wolf Software Suite
//!
//! An authenticated HTTP API that:
//! - Lists, starts, stops, restarts and removes Docker containers
//! - Lists and pulls Docker images, fetches container logs
//! - Controls systemd services over D-Bus, falling back to systemctl
//! - Fetches service logs from the journal

mod api;
mod auth;
mod config;
mod containers;
mod services;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use config::Config;

/// WolfHost — remote container and service control
#[derive(Parser)]
#[command(name = "wolfhost", version, about = "Remote container and service control for the Wolf software suite")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// TLS certificate path (PEM)
    #[arg(long)]
    tls_cert: Option<String>,

    /// TLS private key path (PEM)
    #[arg(long)]
    tls_key: Option<String>,

    /// Manage services with systemctl only
    #[arg(long)]
    no_dbus: bool,

    /// Docker socket path
    #[arg(long)]
    docker_socket: Option<String>,
}

impl Cli {
    /// Flags given on the command line win over the config file
    fn apply(self, mut config: Config) -> Config {
        if let Some(port) = self.port { config.port = port; }
        if let Some(bind) = self.bind { config.bind = bind; }
        if self.tls_cert.is_some() { config.tls_cert = self.tls_cert; }
        if self.tls_key.is_some() { config.tls_key = self.tls_key; }
        if self.docker_socket.is_some() { config.docker_socket = self.docker_socket; }
        if self.no_dbus { config.use_dbus = false; }
        config
    }
}

fn load_tls(cert_path: &str, key_path: &str) -> Option<openssl::ssl::SslAcceptorBuilder> {
    use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};

    let mut builder = match SslAcceptor::mozilla_intermediate(SslMethod::tls()) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Failed to create SSL acceptor: {}, falling back to HTTP", e);
            return None;
        }
    };

    if let Err(e) = builder.set_certificate_chain_file(cert_path) {
        tracing::warn!("Cannot load TLS cert '{}': {}, falling back to HTTP", cert_path, e);
        return None;
    }

    if let Err(e) = builder.set_private_key_file(key_path, SslFiletype::PEM) {
        tracing::warn!("Cannot load TLS key '{}': {}, falling back to HTTP", key_path, e);
        return None;
    }

    Some(builder)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["wolfhost=info", "actix_web=info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(c) => cli.apply(c),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let services = match services::ServiceManager::new(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    let sessions = Arc::new(auth::SessionManager::new(Duration::from_secs(config.session_hours * 3600)));

    info!("");
    info!("  🐺 WolfHost v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Hostname:   {}", hostname);
    info!("  Services:   {}", services.describe());
    info!("  Docker:     {}", config.docker_socket.as_deref().unwrap_or("default socket"));
    if config.api_token.is_some() {
        info!("  API token:  configured");
    }

    let app_state = web::Data::new(api::AppState {
        sessions: sessions.clone(),
        containers: containers::ContainerManager::new(config.docker_socket.clone()),
        services,
        api_token: config.api_token.clone(),
        allowed_users: config.allowed_users.clone(),
    });

    // Background: session cleanup
    let sessions_cleanup = sessions.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let removed = sessions_cleanup.cleanup();
            if removed > 0 {
                tracing::debug!("Purged {} expired session(s)", removed);
            }
        }
    });

    let bind = format!("{}:{}", config.bind, config.port);
    let tls = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => load_tls(cert, key).map(|b| (b, cert.clone(), key.clone())),
        _ => None,
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().limit(64 * 1024))
            .configure(api::configure)
    });

    if let Some((ssl_builder, cert_path, key_path)) = tls {
        info!("  🔒 TLS enabled");
        info!("     Cert: {}", cert_path);
        info!("     Key:  {}", key_path);
        info!("     API:  https://{}", bind);
        info!("");
        server
            .bind_openssl(&bind, ssl_builder)
            .map_err(|e| {
                tracing::error!("❌ Failed to bind HTTPS on {}: {}", bind, e);
                e
            })?
            .run()
            .await
    } else {
        if config.tls_cert.is_some() {
            info!("  ⚠️  TLS configured but failed to load, running HTTP only");
        } else {
            info!("  ⚡ HTTP mode (no TLS certificate configured)");
        }
        info!("     API:  http://{}", bind);
        info!("");
        server
            .bind(&bind)
            .map_err(|e| {
                tracing::error!("❌ Failed to bind HTTP on {}: {}", bind, e);
                e
            })?
            .run()
            .await
    }
}
