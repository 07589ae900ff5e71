//! Least-connections load balancing core.
//!
//! A [`LoadBalancer`] owns a fixed set of upstream hosts, each with an
//! in-flight session counter. Every accepted downstream connection is
//! dispatched to the host with the fewest sessions at the time of arrival,
//! then bytes are spliced in both directions until the session ends.

mod counter;
mod endpoint;
mod registry;

pub use counter::ConnectionCounter;
pub use endpoint::{BalancerError, Endpoint};

use crate::proxy::{connect_to_upstream, splice};
use registry::HostRegistry;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default upper bound on dialing an upstream host.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Written to the client when the upstream dial fails outright.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Written to the client when the dial was cut short by the caller's
/// cancellation token.
pub const UPSTREAM_TIMEOUT_MESSAGE: &str = "Timed out connecting to upstream";

/// A least-connections TCP load balancer.
///
/// Construct one per upstream application. The host set is fixed for the
/// balancer's lifetime; the per-host counters are the only mutable state.
pub struct LoadBalancer {
    registry: HostRegistry,
    connect_timeout: Duration,
}

impl LoadBalancer {
    /// Create a balancer over the given endpoints with the default
    /// connect timeout.
    ///
    /// Absent entries are dropped and duplicate endpoints (same zone, IP,
    /// and port) are treated as a single host. Fails if the list is empty
    /// or contains no present entries.
    pub fn new(endpoints: Vec<Option<Endpoint>>) -> Result<Self, BalancerError> {
        Self::with_connect_timeout(endpoints, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a balancer with an explicit connect timeout.
    pub fn with_connect_timeout(
        endpoints: Vec<Option<Endpoint>>,
        connect_timeout: Duration,
    ) -> Result<Self, BalancerError> {
        let endpoints = endpoint::normalize_endpoints(endpoints)?;
        Ok(Self {
            registry: HostRegistry::new(endpoints),
            connect_timeout,
        })
    }

    /// The configured upper bound on upstream dialing.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Number of hosts in the registry.
    pub fn host_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of each host's endpoint and its current in-flight count.
    ///
    /// Counts are read per host without a global lock, so the snapshot may
    /// mix instants under concurrent traffic.
    pub fn in_flight_counts(&self) -> Vec<(Endpoint, u64)> {
        self.registry
            .hosts()
            .iter()
            .map(|host| (host.endpoint().clone(), host.in_flight().get()))
            .collect()
    }

    /// Proxy one downstream connection to the least-loaded host.
    ///
    /// Takes ownership of `downstream` and guarantees it is closed by the
    /// time this returns. Failures to reach the upstream are reported to the
    /// client as a short plaintext message, never to the caller: the
    /// cancellation token observed as fired at dial failure yields
    /// [`UPSTREAM_TIMEOUT_MESSAGE`], any other dial failure yields
    /// [`INTERNAL_ERROR_MESSAGE`]. The token only bounds the dial; once the
    /// session is established it runs until both directions close.
    #[instrument(skip_all)]
    pub async fn handle<S>(&self, cancel: CancellationToken, mut downstream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let host = self.registry.least_loaded();
        let _in_flight = InFlightGuard::acquire(host.in_flight());

        let upstream =
            match connect_to_upstream(host.addr(), self.connect_timeout, &cancel).await {
                Ok(stream) => stream,
                Err(e) => {
                    let message = if cancel.is_cancelled() {
                        UPSTREAM_TIMEOUT_MESSAGE
                    } else {
                        INTERNAL_ERROR_MESSAGE
                    };

                    warn!(upstream = %host.endpoint(), error = %e, "failed to dial upstream");

                    let _ = downstream.write_all(message.as_bytes()).await;
                    let _ = downstream.shutdown().await;
                    return;
                }
            };

        let result = splice(downstream, upstream).await;

        debug!(
            upstream = %host.endpoint(),
            bytes_to_upstream = result.bytes_to_upstream,
            bytes_to_client = result.bytes_to_client,
            "session completed"
        );
    }
}

/// Holds a host's in-flight count incremented for the guard's lifetime.
struct InFlightGuard<'a> {
    counter: &'a ConnectionCounter,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(counter: &'a ConnectionCounter) -> Self {
        counter.increment();
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}
