//! The channel capability that transports implement.
//!
//! A channel wraps an already-established (or lazily-established)
//! bidirectional connection and is responsible only for framing: tagging
//! outbound requests onto the wire and yielding well-formed inbound
//! responses. It owns the physical connection handle; the correlator holds
//! a shared reference and does not manage connection lifecycle.

use std::future::Future;

use crate::{ChannelError, WireRequest, WireResponse};

/// Framing/delivery capability over a persistent bidirectional connection.
///
/// The correlator is the sole consumer of [`Channel::recv`]; `transmit` may
/// be called concurrently from many senders.
pub trait Channel {
    /// Write one request to the connection.
    ///
    /// May block briefly on local buffering but must not block on remote
    /// acknowledgement.
    fn transmit(
        &self,
        msg: &WireRequest,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next well-formed inbound response.
    ///
    /// The connection may carry unrelated traffic: inbound messages that are
    /// not structured objects or lack the reserved identifier field are
    /// skipped inside the channel, never surfaced. `Ok(None)` means the
    /// connection closed cleanly.
    fn recv(&self) -> impl Future<Output = Result<Option<WireResponse>, ChannelError>> + Send;

    /// Close the connection.
    fn close(&self) -> impl Future<Output = Result<(), ChannelError>> + Send;
}
