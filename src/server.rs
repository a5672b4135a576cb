use crate::handlers::Gateway;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Version information for the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 250;

/// The HTTP listener serving the gateway routes
pub struct GatewayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown_rx: watch::Receiver<bool>,
    grace_period: Duration,
    max_concurrent_streams: u32,
}

impl GatewayServer {
    /// Bind the listening socket. Port 0 picks a free port, see [`GatewayServer::local_addr`].
    pub async fn bind(
        bind_addr: SocketAddr,
        gateway: Arc<Gateway>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            gateway,
            shutdown_rx,
            grace_period: DEFAULT_GRACE_PERIOD,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        })
    }

    /// How long in-flight requests may run after shutdown is signalled
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut builder = AutoBuilder::new(TokioExecutor::new());
        builder
            .http2()
            .max_concurrent_streams(self.max_concurrent_streams);

        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            let service = service_fn(move |req: Request<Incoming>| {
                                let gateway = Arc::clone(&gateway);
                                async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                            });

                            let conn = builder.serve_connection(TokioIo::new(stream), service);
                            let conn = graceful.watch(conn.into_owned());

                            connections.spawn(async move {
                                if let Err(e) = conn.await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                // Reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Gateway shutting down, no longer accepting connections");
                        break;
                    }
                }
            }
        }

        // Stop accepting before draining
        drop(self.listener);

        match tokio::time::timeout(self.grace_period, graceful.shutdown()).await {
            Ok(()) => info!("All connections drained"),
            Err(_) => warn!(
                grace_period_ms = self.grace_period.as_millis() as u64,
                remaining = connections.len(),
                "Grace period elapsed, closing remaining connections"
            ),
        }

        // Aborting a connection task drops its socket
        connections.shutdown().await;

        Ok(())
    }
}
