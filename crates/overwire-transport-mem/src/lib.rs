//! overwire-transport-mem: in-process channel for overwire.
//!
//! This is the semantic reference implementation. All other channels must
//! behave identically to this one; if behavior differs, the other channel
//! has a bug.
//!
//! The wire is a pair of crossed unbounded queues carrying raw
//! `serde_json::Value`s, so tests can inject malformed and unrelated
//! traffic and observe exactly what a channel puts on the wire.

use overwire_core::{Channel, ChannelError, WireRequest, WireResponse};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// One end of an in-process connection.
pub struct MemChannel {
    /// Taken on close; a taken sender means the connection is closed from
    /// this side.
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Value>>,
}

impl MemChannel {
    /// Two cross-connected ends. Dropping or closing either end closes the
    /// connection for the other.
    pub fn pair() -> (MemChannel, MemChannel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemChannel {
                outbound: Mutex::new(Some(a_tx)),
                inbound: AsyncMutex::new(a_rx),
            },
            MemChannel {
                outbound: Mutex::new(Some(b_tx)),
                inbound: AsyncMutex::new(b_rx),
            },
        )
    }

    /// Put an arbitrary value on the wire, bypassing framing.
    pub fn send_raw(&self, value: Value) -> Result<(), ChannelError> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(value).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    /// Next raw value off the wire; `None` when the peer closed.
    pub async fn recv_raw(&self) -> Option<Value> {
        self.inbound.lock().await.recv().await
    }
}

impl Channel for MemChannel {
    async fn transmit(&self, msg: &WireRequest) -> Result<(), ChannelError> {
        let value = serde_json::to_value(msg).map_err(ChannelError::Codec)?;
        self.send_raw(value)
    }

    async fn recv(&self) -> Result<Option<WireResponse>, ChannelError> {
        loop {
            match self.recv_raw().await {
                None => return Ok(None),
                Some(value) => match serde_json::from_value::<WireResponse>(value) {
                    Ok(wire) => return Ok(Some(wire)),
                    Err(_) => {
                        // Unrelated or malformed traffic is not ours to fail on.
                        tracing::trace!("skipping non-response message");
                        continue;
                    }
                },
            }
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.outbound.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overwire_core::{Method, RequestId, RequestSpec};
    use serde_json::json;

    #[tokio::test]
    async fn transmit_puts_the_tagged_request_on_the_wire() {
        let (a, b) = MemChannel::pair();
        let spec = RequestSpec::new(Method::Post, "/things").with_body(json!({"name": "x"}));
        let id = RequestId::generate();
        a.transmit(&WireRequest::new(id.clone(), &spec)).await.unwrap();

        let value = b.recv_raw().await.unwrap();
        assert_eq!(value["_requestId"], json!(id.as_str()));
        assert_eq!(value["method"], json!("POST"));
        assert_eq!(value["url"], json!("/things"));
        assert_eq!(value["data"], json!({"name": "x"}));
    }

    #[tokio::test]
    async fn recv_skips_unrelated_traffic() {
        let (a, b) = MemChannel::pair();
        b.send_raw(json!("not an object")).unwrap();
        b.send_raw(json!(42)).unwrap();
        b.send_raw(json!({"no": "identifier"})).unwrap();
        b.send_raw(json!({"_requestId": "abc", "_status": 200, "value": 1})).unwrap();

        let wire = a.recv().await.unwrap().unwrap();
        assert_eq!(wire.request_id.as_str(), "abc");
        assert_eq!(wire.payload["value"], json!(1));
    }

    #[tokio::test]
    async fn peer_close_yields_clean_end_of_stream() {
        let (a, b) = MemChannel::pair();
        b.close().await.unwrap();
        assert!(matches!(a.recv().await, Ok(None)));
    }

    #[tokio::test]
    async fn transmit_after_close_fails() {
        let (a, _b) = MemChannel::pair();
        a.close().await.unwrap();
        let wire = WireRequest::new(RequestId::generate(), &RequestSpec::get("/x"));
        assert!(matches!(a.transmit(&wire).await, Err(ChannelError::Closed)));
    }
}
