//! Relay server
//!
//! Binds the UDP ingestion socket and the HTTP listener, then runs the
//! ingestion loop, the HTTP server, and the broadcaster's background tasks
//! until shutdown or a fatal ingestion error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

use crate::broadcast::Broadcaster;
use crate::error::{Error, Result};
use crate::ingest::{DatagramSource, Ingester};
use crate::sampler::Sampler;
use crate::server::config::ServerConfig;
use crate::server::{connection, http};
use crate::stats::IngestStats;

/// How long open HTTP connections get to finish after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Sockets bound at startup
pub struct BoundSockets {
    udp: UdpSocket,
    http: TcpListener,
}

impl BoundSockets {
    /// Actual UDP address (resolves port 0)
    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Actual HTTP address (resolves port 0)
    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }
}

/// UDP-to-SSE relay server
pub struct OrbitalServer {
    config: ServerConfig,
    broadcaster: Arc<Broadcaster>,
    ingest_stats: Arc<IngestStats>,
}

impl OrbitalServer {
    /// Create a new server, validating the configuration
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            broadcaster: Arc::new(Broadcaster::with_config(config.broadcaster_config())),
            ingest_stats: Arc::new(IngestStats::new()),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the broadcaster
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Ingestion counters
    pub fn ingest_stats(&self) -> &Arc<IngestStats> {
        &self.ingest_stats
    }

    /// Bind both sockets
    ///
    /// Failing to bind either one is fatal at startup.
    pub async fn bind(&self) -> Result<BoundSockets> {
        let udp_addr = self.config.udp_addr();
        let udp = UdpSocket::bind(udp_addr).await.map_err(|source| Error::Bind {
            what: "udp",
            addr: udp_addr,
            source,
        })?;

        let http_addr = self.config.http_addr();
        let http = TcpListener::bind(http_addr)
            .await
            .map_err(|source| Error::Bind {
                what: "http",
                addr: http_addr,
                source,
            })?;

        tracing::info!(addr = ?udp.local_addr().ok(), "Listening for UDP events");
        tracing::info!(addr = ?http.local_addr().ok(), "Listening for HTTP connections");

        Ok(BoundSockets { udp, http })
    }

    /// Run the server
    ///
    /// This method only returns on a fatal error.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let sockets = self.bind().await?;
        self.serve(sockets, shutdown).await
    }

    /// Serve on already-bound sockets until `shutdown` resolves
    ///
    /// An ingestion receive error stops everything and is returned.
    pub async fn serve<F>(&self, sockets: BoundSockets, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let BoundSockets { udp, http } = sockets;
        self.serve_source(udp, http, shutdown).await
    }

    /// Serve HTTP on `http` while ingesting from any datagram source
    pub async fn serve_source<S, F>(
        &self,
        source: S,
        http: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        S: DatagramSource,
        F: std::future::Future<Output = ()>,
    {
        let ingester = Ingester::new(
            source,
            Sampler::new(self.config.sample_rate),
            Arc::clone(&self.broadcaster),
        )
        .max_message_size(self.config.max_message_size)
        .with_stats(Arc::clone(&self.ingest_stats));

        let cleanup_handle = self.broadcaster.spawn_cleanup_task();
        let stats_handle = self.spawn_stats_task();

        let (stop_tx, stop_rx) = watch::channel(false);
        let app = http::router(Arc::clone(&self.broadcaster), &self.config);
        let mut http_task = tokio::spawn(connection::serve(
            http,
            app,
            self.config.write_timeout,
            stop_rx,
        ));

        let mut http_finished = false;
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = ingester.run() => result,
            joined = &mut http_task => {
                http_finished = true;
                match joined {
                    Ok(()) => Err(Error::Http(std::io::Error::other("HTTP server stopped"))),
                    Err(e) => Err(Error::Http(std::io::Error::other(e))),
                }
            }
        };

        // Stop background tasks
        cleanup_handle.abort();
        stats_handle.abort();

        // Ending every subscriber ends every open event stream, which lets
        // the graceful HTTP shutdown complete.
        self.broadcaster.shutdown();
        let _ = stop_tx.send(true);

        if !http_finished {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut http_task).await {
                Ok(joined) => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "HTTP server error during shutdown");
                    }
                }
                Err(_) => {
                    tracing::warn!("HTTP server did not stop in time");
                    http_task.abort();
                }
            }
        }

        result
    }

    fn spawn_stats_task(&self) -> tokio::task::JoinHandle<()> {
        let broadcaster = Arc::clone(&self.broadcaster);
        let ingest_stats = Arc::clone(&self.ingest_stats);
        let interval = self.config.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let ingest = ingest_stats.snapshot();
                let fanout = broadcaster.stats();
                tracing::info!(
                    received = ingest.datagrams_received,
                    forwarded = ingest.forwarded,
                    oversized = ingest.oversized,
                    subscribers = fanout.active_subscribers,
                    deliveries = fanout.deliveries,
                    dropped = fanout.dropped,
                    "Relay stats"
                );
            }
        })
    }
}
