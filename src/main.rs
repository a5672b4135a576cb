use ncm_gateway::config::{Config, PORT_ENV};
use ncm_gateway::cookies::{CookieJar, CookieRelay};
use ncm_gateway::cors::Cors;
use ncm_gateway::handlers::Gateway;
use ncm_gateway::router::Router;
use ncm_gateway::server::{GatewayServer, PKG_NAME, VERSION};
use ncm_gateway::upstream::UpstreamService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ncm_gateway=debug".parse()?),
        )
        .init();

    let config = load_config().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    print_startup_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One jar per gateway session, shared by the handlers and the upstream client
    let jar = Arc::new(CookieJar::new(&config.cookies.domain)?);
    info!(domain = jar.domain(), "Cookie jar ready");
    let service = UpstreamService::new(&config.upstream, Arc::clone(&jar))?;
    let relay = CookieRelay::new(jar, &config.cookies);
    let cors = Cors::from_config(&config.cors)?;
    let router = Router::new();
    let paths = router.paths();
    info!(routes = paths.len(), "Route table built");
    debug!(?paths, "Routes");

    let gateway = Arc::new(Gateway::new(router, Arc::new(service), relay, cors));

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GatewayServer::bind(bind_addr, gateway, shutdown_rx)
        .await
        .map_err(|e| {
            error!(addr = %bind_addr, error = %e, "Server failed to start");
            e
        })?
        .with_grace_period(config.server.shutdown_grace_period())
        .with_max_concurrent_streams(config.server.max_concurrent_streams);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;

    info!("Shutdown complete");
    Ok(())
}

/// First CLI argument names the config file; a missing default file means all defaults
fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = Config::load(&path)?;
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        None if PathBuf::from(DEFAULT_CONFIG_PATH).exists() => {
            let config = Config::load(DEFAULT_CONFIG_PATH)?;
            info!(path = DEFAULT_CONFIG_PATH, "Configuration loaded");
            config
        }
        None => {
            info!("No configuration file, using defaults");
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref())?;
    Ok(config)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the gateway");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting music gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        shutdown_grace_period_secs = config.server.shutdown_grace_period_secs,
        max_concurrent_streams = config.server.max_concurrent_streams,
        "Server configuration"
    );
    info!(
        base_url = %config.upstream.base_url,
        request_timeout_secs = config.upstream.request_timeout_secs,
        pool_max_idle_per_host = config.upstream.pool_max_idle_per_host,
        "Upstream music service"
    );
    info!(
        domain = %config.cookies.domain,
        reflect_domain = %config.cookies.reflect_domain,
        path = %config.cookies.path,
        "Cookie relay"
    );
    info!(
        allow_origin = %config.cors.allow_origin,
        allow_methods = %config.cors.allow_methods,
        "CORS"
    );
}
