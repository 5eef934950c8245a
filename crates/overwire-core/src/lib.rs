//! overwire-core: request/response correlation over a persistent socket.
//!
//! This crate defines:
//! - Wire and envelope types ([`RequestId`], [`RequestSpec`], [`WireRequest`],
//!   [`WireResponse`], [`ResponseEnvelope`])
//! - The channel capability ([`Channel`]) that transports implement
//! - The pending-request table ([`PendingTable`])
//! - The single-flight response cache ([`ResponseCache`])
//! - The correlator ([`Correlator`]) that multiplexes concurrent requests
//!   over one channel and sweeps expired entries
//! - The routing facade ([`Facade`], [`RoutePolicy`])
//! - Error types ([`CallError`], [`ChannelError`], [`ConfigError`])

mod cache;
mod channel;
mod config;
mod correlator;
mod error;
mod facade;
mod pending;
mod wire;

pub use cache::*;
pub use channel::*;
pub use config::*;
pub use correlator::*;
pub use error::*;
pub use facade::*;
pub use pending::*;
pub use wire::*;
