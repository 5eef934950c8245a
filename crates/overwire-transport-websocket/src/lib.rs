//! overwire-transport-websocket: WebSocket channel for overwire.
//!
//! Frames requests as JSON text messages over a persistent WebSocket and
//! parses inbound text or binary messages back into wire responses. The
//! socket may carry unrelated traffic; anything that is not a well-formed
//! response is skipped here and never reaches the correlator.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use overwire_core::{Channel, ChannelError, ChannelKind, ConfigError, WireRequest, WireResponse};

/// Connection configuration: which channel kind to use and where to dial.
///
/// The kind string is validated at construction, so a configuration naming
/// an unsupported kind fails before any connection is attempted.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub kind: String,
    pub url: String,
}

impl WebSocketConfig {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
        }
    }

    pub fn validate(&self) -> Result<ChannelKind, ConfigError> {
        self.kind.parse()
    }
}

/// Failure to establish a WebSocket channel.
#[derive(Debug)]
pub enum ConnectError {
    Config(ConfigError),
    Handshake(tokio_tungstenite::tungstenite::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Config(e) => write!(f, "invalid configuration: {e}"),
            ConnectError::Handshake(e) => write!(f, "websocket handshake failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Config(e) => Some(e),
            ConnectError::Handshake(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ConnectError {
    fn from(e: ConfigError) -> Self {
        ConnectError::Config(e)
    }
}

/// Channel over an established WebSocket stream.
///
/// Works with any stream (TCP, TLS, in-memory duplex).
pub struct WebSocketChannel<S> {
    inner: Arc<WebSocketInner<S>>,
}

struct WebSocketInner<S> {
    /// Write half (async mutex for holding across awaits).
    sink: AsyncMutex<SplitSink<WebSocketStream<S>, Message>>,
    /// Read half (async mutex for holding across awaits).
    stream: AsyncMutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
}

impl<S> WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            inner: Arc::new(WebSocketInner {
                sink: AsyncMutex::new(sink),
                stream: AsyncMutex::new(stream),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Validate `config` and dial its URL.
pub async fn connect(
    config: &WebSocketConfig,
) -> Result<WebSocketChannel<MaybeTlsStream<TcpStream>>, ConnectError> {
    let _kind: ChannelKind = config.validate()?;
    let (ws, _resp) = tokio_tungstenite::connect_async(&config.url)
        .await
        .map_err(ConnectError::Handshake)?;
    Ok(WebSocketChannel::new(ws))
}

impl WebSocketChannel<tokio::io::DuplexStream> {
    /// A channel handshaken against an in-memory peer, plus the raw peer
    /// stream for scripting responses in tests.
    pub async fn pair() -> (Self, WebSocketStream<tokio::io::DuplexStream>) {
        let (client_stream, server_stream) = tokio::io::duplex(65536);

        let (client, server) = tokio::join!(
            async {
                tokio_tungstenite::client_async("ws://localhost/", client_stream)
                    .await
                    .expect("client handshake failed")
                    .0
            },
            async {
                tokio_tungstenite::accept_async(server_stream)
                    .await
                    .expect("server handshake failed")
            }
        );

        (Self::new(client), server)
    }
}

impl<S> Channel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn transmit(&self, msg: &WireRequest) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let text = serde_json::to_string(msg).map_err(ChannelError::Codec)?;

        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Io(std::io::Error::other(format!("websocket send: {e}"))))
    }

    async fn recv(&self) -> Result<Option<WireResponse>, ChannelError> {
        if self.is_closed() {
            return Ok(None);
        }

        let mut stream = self.inner.stream.lock().await;
        loop {
            let msg = match stream.next().await {
                None => {
                    self.inner.closed.store(true, Ordering::Release);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(ChannelError::Io(std::io::Error::other(format!(
                        "websocket recv: {e}"
                    ))));
                }
                Some(Ok(msg)) => msg,
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::trace!("skipping non-utf8 binary message");
                        continue;
                    }
                },
                Message::Ping(payload) => {
                    let mut sink = self.inner.sink.lock().await;
                    let _ = sink.send(Message::Pong(payload)).await;
                    continue;
                }
                Message::Close(_) => {
                    self.inner.closed.store(true, Ordering::Release);
                    return Ok(None);
                }
                Message::Pong(_) | Message::Frame(_) => continue,
            };

            match serde_json::from_str::<WireResponse>(&text) {
                Ok(wire) => return Ok(Some(wire)),
                Err(_) => {
                    // The socket may carry unrelated traffic.
                    tracing::trace!("skipping non-response message");
                    continue;
                }
            }
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.inner.closed.store(true, Ordering::Release);
        let mut sink = self.inner.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overwire_core::{Method, RequestId, RequestSpec};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn config_validation_fails_fast_on_unknown_kind() {
        let config = WebSocketConfig::new("carrier-pigeon", "ws://localhost/");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedChannel(_))
        ));
        assert!(WebSocketConfig::new("websocket", "ws://localhost/")
            .validate()
            .is_ok());
    }

    #[tokio::test]
    async fn transmit_frames_the_request_as_json_text() {
        let (channel, mut server) = WebSocketChannel::pair().await;
        let spec = RequestSpec::new(Method::Post, "/things").with_body(json!({"name": "x"}));
        let id = RequestId::generate();
        channel.transmit(&WireRequest::new(id.clone(), &spec)).await.unwrap();

        let msg = server.next().await.unwrap().unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text message, got {msg:?}");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["_requestId"], json!(id.as_str()));
        assert_eq!(value["method"], json!("POST"));
        assert_eq!(value["url"], json!("/things"));
        assert_eq!(value["data"], json!({"name": "x"}));
    }

    #[tokio::test]
    async fn recv_parses_text_and_binary_responses() {
        let (channel, mut server) = WebSocketChannel::pair().await;

        server
            .send(Message::Text(
                json!({"_requestId": "a", "_status": 200, "n": 1}).to_string(),
            ))
            .await
            .unwrap();
        server
            .send(Message::Binary(
                json!({"_requestId": "b", "n": 2}).to_string().into_bytes(),
            ))
            .await
            .unwrap();

        let first = channel.recv().await.unwrap().unwrap();
        assert_eq!(first.request_id.as_str(), "a");
        let second = channel.recv().await.unwrap().unwrap();
        assert_eq!(second.request_id.as_str(), "b");
        assert_eq!(second.status_or_default(), 200);
    }

    #[tokio::test]
    async fn recv_skips_unrelated_traffic() {
        let (channel, mut server) = WebSocketChannel::pair().await;

        server.send(Message::Text("not json".into())).await.unwrap();
        server.send(Message::Text("42".into())).await.unwrap();
        server
            .send(Message::Text(json!({"no": "identifier"}).to_string()))
            .await
            .unwrap();
        server
            .send(Message::Text(
                json!({"_requestId": "real", "value": 7}).to_string(),
            ))
            .await
            .unwrap();

        let wire = channel.recv().await.unwrap().unwrap();
        assert_eq!(wire.request_id.as_str(), "real");
        assert_eq!(wire.payload["value"], json!(7));
    }

    #[tokio::test]
    async fn close_frame_ends_the_stream_cleanly() {
        let (channel, mut server) = WebSocketChannel::pair().await;
        server.send(Message::Close(None)).await.unwrap();

        assert!(matches!(channel.recv().await, Ok(None)));
        assert!(channel.is_closed());

        let wire = WireRequest::new(RequestId::generate(), &RequestSpec::get("/x"));
        assert!(matches!(
            channel.transmit(&wire).await,
            Err(ChannelError::Closed)
        ));
    }
}

/// Conformance tests shared with every other channel implementation.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use overwire_testkit::{ChannelFactory, RawPeer};
    use serde_json::Value;

    struct WebSocketFactory;

    impl ChannelFactory for WebSocketFactory {
        type Channel = WebSocketChannel<tokio::io::DuplexStream>;

        async fn connect_pair() -> (Self::Channel, RawPeer) {
            let (channel, server) = WebSocketChannel::pair().await;
            let (peer, to_peer, mut from_peer) = RawPeer::endpoints();

            let (mut sink, mut stream) = server.split();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = stream.next().await {
                    if let Message::Text(text) = msg {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            if to_peer.send(value).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            tokio::spawn(async move {
                while let Some(value) = from_peer.recv().await {
                    if sink.send(Message::Text(value.to_string())).await.is_err() {
                        break;
                    }
                }
            });

            (channel, peer)
        }
    }

    #[tokio::test]
    async fn unary_happy_path() {
        overwire_testkit::run_unary_happy_path::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn out_of_order_responses() {
        overwire_testkit::run_out_of_order_responses::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn status_classification() {
        overwire_testkit::run_status_classification::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn timeout_expiry() {
        overwire_testkit::run_timeout_expiry::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn single_flight() {
        overwire_testkit::run_single_flight::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn cache_eviction_on_failure() {
        overwire_testkit::run_cache_eviction_on_failure::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn unmatched_id_tolerance() {
        overwire_testkit::run_unmatched_id_tolerance::<WebSocketFactory>().await;
    }
}
