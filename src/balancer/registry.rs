//! Host registry and least-connections selection.

use crate::balancer::counter::ConnectionCounter;
use crate::balancer::endpoint::Endpoint;
use std::net::SocketAddr;

/// An upstream server paired with its in-flight session count.
#[derive(Debug)]
pub(crate) struct Host {
    endpoint: Endpoint,
    in_flight: ConnectionCounter,
}

impl Host {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            in_flight: ConnectionCounter::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.endpoint.socket_addr()
    }

    pub(crate) fn in_flight(&self) -> &ConnectionCounter {
        &self.in_flight
    }
}

/// Immutable, ordered collection of hosts.
///
/// The stored order is fixed at construction and defines the selector's
/// tie-break: among hosts with equal counts, the earliest entry wins.
#[derive(Debug)]
pub(crate) struct HostRegistry {
    hosts: Vec<Host>,
}

impl HostRegistry {
    /// Build a registry from normalized endpoints. Callers must pass at
    /// least one endpoint, with duplicates already removed.
    pub(crate) fn new(endpoints: Vec<Endpoint>) -> Self {
        debug_assert!(!endpoints.is_empty());
        Self {
            hosts: endpoints.into_iter().map(Host::new).collect(),
        }
    }

    /// The host with the fewest in-flight sessions.
    ///
    /// Counters are read without a lock, so two concurrent callers may both
    /// observe the same minimum and pick the same host; the dispatcher's
    /// subsequent increment corrects the skew on the next scan. The
    /// strict-less comparison keeps the earliest stored host on ties.
    pub(crate) fn least_loaded(&self) -> &Host {
        let mut selected = &self.hosts[0];
        let mut min = selected.in_flight().get();

        for host in &self.hosts[1..] {
            let count = host.in_flight().get();
            if count < min {
                min = count;
                selected = host;
            }
        }

        selected
    }

    pub(crate) fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub(crate) fn len(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::thread;

    fn registry(ports: &[u16]) -> HostRegistry {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        HostRegistry::new(ports.iter().map(|&p| Endpoint::new(ip, p)).collect())
    }

    #[test]
    fn test_selects_host_with_fewest_sessions() {
        let registry = registry(&[9001, 9002, 9003]);

        registry.hosts()[0].in_flight().increment();
        registry.hosts()[0].in_flight().increment();
        registry.hosts()[1].in_flight().increment();

        let selected = registry.least_loaded();
        assert_eq!(selected.endpoint(), registry.hosts()[2].endpoint());
    }

    #[test]
    fn test_tie_break_prefers_first_stored_host() {
        let registry = registry(&[9001, 9002, 9003]);

        let selected = registry.least_loaded();
        assert_eq!(selected.endpoint(), registry.hosts()[0].endpoint());
    }

    #[test]
    fn test_concurrent_selection_avoids_loaded_host() {
        let registry = Arc::new(registry(&[9001, 9002]));
        registry.hosts()[0].in_flight().increment();

        let loaded = registry.hosts()[0].endpoint().clone();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let loaded = loaded.clone();
                thread::spawn(move || {
                    let selected = registry.least_loaded();
                    assert_ne!(selected.endpoint(), &loaded);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_tie_break_is_deterministic() {
        let registry = Arc::new(registry(&[9001, 9002, 9003]));
        let first = registry.hosts()[0].endpoint().clone();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let first = first.clone();
                thread::spawn(move || {
                    assert_eq!(registry.least_loaded().endpoint(), &first);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
