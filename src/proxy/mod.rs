//! Byte-level proxying between downstream and upstream streams.

mod tcp;

pub use tcp::{connect_to_upstream, splice, DialError, SpliceResult};
