//! Frontend listener.
//!
//! Accepts incoming connections and hands each one to the balancer.

use crate::balancer::LoadBalancer;
use crate::config::ListenerConfig;
use crate::metrics::MetricsCollector;
use crate::util::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Listener that accepts downstream connections and dispatches them.
pub struct ProxyListener {
    name: String,
    listener: TcpListener,
    balancer: Arc<LoadBalancer>,
    metrics: MetricsCollector,
}

impl ProxyListener {
    /// Bind the configured listen address.
    pub async fn bind(
        config: &ListenerConfig,
        balancer: Arc<LoadBalancer>,
        metrics: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;

        info!(
            name = %config.name,
            listen = %config.listen,
            upstreams = balancer.host_count(),
            "listener bound"
        );

        Ok(Self {
            name: config.name.clone(),
            listener,
            balancer,
            metrics,
        })
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the token is cancelled.
    ///
    /// Each session gets a child token, so shutdown aborts dials still in
    /// progress but lets established sessions run to completion.
    #[instrument(skip_all, fields(listener = %self.name))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            self.spawn_session(stream, peer_addr, &shutdown);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr, shutdown: &CancellationToken) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let balancer = Arc::clone(&self.balancer);
        let metrics = self.metrics.clone();
        let listener_name = self.name.clone();
        let conn_id = ConnectionId::short();
        let cancel = shutdown.child_token();

        metrics.connection_opened(&listener_name);

        tokio::spawn(async move {
            let start = Instant::now();

            debug!(conn_id = %conn_id, client = %peer_addr, "session accepted");

            balancer.handle(cancel, stream).await;

            metrics.connection_closed(&listener_name);

            debug!(
                conn_id = %conn_id,
                client = %peer_addr,
                duration_ms = start.elapsed().as_millis(),
                "session finished"
            );
        });
    }
}
