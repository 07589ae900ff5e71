//! tcplb - a least-connections TCP (Layer 4) load balancer
//!
//! This crate provides a transport-layer reverse proxy that forwards each
//! accepted connection to whichever of a fixed set of upstream servers has
//! the fewest sessions in flight:
//! - Concurrent-safe host selection with deterministic tie-breaking
//! - Bidirectional stream splicing with correct half-close handling
//! - Bounded-time upstream dialing, cancellable per connection
//! - Prometheus metrics

pub mod balancer;
pub mod config;
pub mod frontend;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use balancer::{BalancerError, Endpoint, LoadBalancer};
pub use config::Config;
