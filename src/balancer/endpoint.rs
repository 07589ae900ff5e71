//! Upstream endpoint representation and input normalization.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};
use thiserror::Error;

/// Errors raised while constructing a load balancer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalancerError {
    /// The list of endpoints passed was empty.
    #[error("no upstream endpoints were provided")]
    EmptyInput,

    /// The list of endpoints contained no present entries.
    #[error("none of the provided upstream endpoints were present")]
    NoValidEntries,
}

/// A network location an upstream server listens on.
///
/// Two endpoints are equal when zone, IP, and port all match; the IP is
/// compared as an address, not textually.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Textual scope identifier, usually empty outside link-local IPv6.
    pub zone: String,
    /// Address of the upstream.
    pub ip: IpAddr,
    /// Port the upstream listens on.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint with an empty zone.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            zone: String::new(),
            ip,
            port,
        }
    }

    /// Create an endpoint with an explicit zone.
    pub fn with_zone(zone: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            zone: zone.into(),
            ip,
            port,
        }
    }

    /// The dialable address for this endpoint.
    ///
    /// An IPv6 zone names the scope to dial through: numeric zones become
    /// the scope id directly, interface names are resolved through the OS.
    /// Zones on IPv4 endpoints only participate in equality.
    pub fn socket_addr(&self) -> SocketAddr {
        match self.ip {
            IpAddr::V4(ip) => SocketAddr::V4(SocketAddrV4::new(ip, self.port)),
            IpAddr::V6(ip) => {
                let scope_id = if self.zone.is_empty() {
                    0
                } else {
                    resolve_zone(&self.zone)
                };
                SocketAddr::V6(SocketAddrV6::new(ip, self.port, 0, scope_id))
            }
        }
    }

    fn dedup_key(&self) -> (String, String, u16) {
        (self.zone.clone(), self.ip.to_string(), self.port)
    }
}

/// Resolve a textual zone to an interface index, as the OS does for an
/// address literal like `fe80::1%eth0`. Unknown interfaces resolve to 0
/// (the unscoped default).
#[cfg(unix)]
fn resolve_zone(zone: &str) -> u32 {
    if let Ok(index) = zone.parse::<u32>() {
        return index;
    }
    let Ok(name) = std::ffi::CString::new(zone) else {
        return 0;
    };
    // SAFETY: name is NUL-terminated; if_nametoindex only reads it and
    // returns 0 for interfaces it does not know.
    unsafe { libc::if_nametoindex(name.as_ptr()) }
}

#[cfg(not(unix))]
fn resolve_zone(zone: &str) -> u32 {
    zone.parse().unwrap_or(0)
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V6(v6) if v6.scope_id() != 0 => Self::with_zone(
                v6.scope_id().to_string(),
                IpAddr::V6(*v6.ip()),
                v6.port(),
            ),
            addr => Self::new(addr.ip(), addr.port()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.zone.is_empty() {
            write!(f, "{}:{}", self.ip, self.port)
        } else {
            write!(f, "{}%{}:{}", self.ip, self.zone, self.port)
        }
    }
}

/// Validate a caller-supplied endpoint list and collapse duplicates.
///
/// Absent entries are dropped. Duplicates are collapsed by
/// `(zone, ip-text, port)` through a map, so the returned order is
/// unspecified; the registry freezes whatever order comes out.
pub(crate) fn normalize_endpoints(
    endpoints: Vec<Option<Endpoint>>,
) -> Result<Vec<Endpoint>, BalancerError> {
    if endpoints.is_empty() {
        return Err(BalancerError::EmptyInput);
    }

    let mut unique: HashMap<(String, String, u16), Endpoint> = HashMap::new();
    for endpoint in endpoints.into_iter().flatten() {
        unique.insert(endpoint.dedup_key(), endpoint);
    }

    if unique.is_empty() {
        return Err(BalancerError::NoValidEntries);
    }

    Ok(unique.into_values().collect())
}
