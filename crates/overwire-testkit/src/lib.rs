//! overwire-testkit: conformance scenarios for overwire channels.
//!
//! Every channel implementation must pass the same scenarios against the
//! same correlator. A channel crate implements [`ChannelFactory`], bridging
//! its peer side to a [`RawPeer`], then instantiates each `run_*` scenario
//! in a `#[tokio::test]`:
//!
//! ```ignore
//! struct MyFactory;
//!
//! impl ChannelFactory for MyFactory {
//!     type Channel = MyChannel;
//!     async fn connect_pair() -> (Self::Channel, RawPeer) {
//!         // connect a channel, pump its peer side into RawPeer endpoints
//!     }
//! }
//!
//! #[tokio::test]
//! async fn unary_happy_path() {
//!     overwire_testkit::run_unary_happy_path::<MyFactory>().await;
//! }
//! ```
//!
//! This crate is test tooling: helpers panic with a message instead of
//! returning errors.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use overwire_core::{
    CacheMode, Channel, Correlator, CorrelatorConfig, RequestSpec, ID_FIELD, STATUS_FIELD,
    STATUS_TIMED_OUT,
};

/// Builds a connected channel together with a scriptable view of its peer.
pub trait ChannelFactory {
    type Channel: Channel + Send + Sync + 'static;

    fn connect_pair() -> impl Future<Output = (Self::Channel, RawPeer)> + Send;
}

/// The remote end of a connection, as raw JSON values.
///
/// Scenarios read what the channel transmitted and script what comes back,
/// including traffic no well-behaved respondent would send.
pub struct RawPeer {
    to_channel: mpsc::UnboundedSender<Value>,
    from_channel: mpsc::UnboundedReceiver<Value>,
}

impl RawPeer {
    /// A peer plus the factory-side plumbing: values pushed into the
    /// returned sender appear as transmitted requests, values the scenario
    /// sends come out of the returned receiver for delivery to the channel.
    pub fn endpoints() -> (
        RawPeer,
        mpsc::UnboundedSender<Value>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        (
            RawPeer {
                to_channel: response_tx,
                from_channel: request_rx,
            },
            request_tx,
            response_rx,
        )
    }

    /// Next request the channel transmitted. Panics if none arrives within
    /// five seconds.
    pub async fn next_request(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.from_channel.recv())
            .await
            .expect("no request transmitted within 5s")
            .expect("channel side closed")
    }

    /// Request already transmitted, if any. Never waits.
    pub fn try_next_request(&mut self) -> Option<Value> {
        self.from_channel.try_recv().ok()
    }

    /// Put an arbitrary value on the wire toward the channel.
    pub fn send(&self, value: Value) {
        self.to_channel
            .send(value)
            .expect("channel side closed");
    }

    /// Answer `request` with `status` and the fields of `payload`.
    pub fn respond(&self, request: &Value, status: u16, payload: Value) {
        let mut response = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".into(), other);
                map
            }
        };
        response.insert(ID_FIELD.into(), request[ID_FIELD].clone());
        response.insert(STATUS_FIELD.into(), json!(status));
        self.send(Value::Object(response));
    }
}

async fn connect<F: ChannelFactory>(
    config: CorrelatorConfig,
) -> (Arc<Correlator<F::Channel>>, RawPeer) {
    let (channel, peer) = F::connect_pair().await;
    let correlator = Arc::new(Correlator::new(Arc::new(channel), config));
    tokio::spawn(correlator.clone().run());
    (correlator, peer)
}

/// One request, one matching response a little later, success observed.
pub async fn run_unary_happy_path<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;

    let call = tokio::spawn(correlator.send(RequestSpec::get("/example")));
    let request = peer.next_request().await;
    assert_eq!(request["method"], json!("GET"));
    assert_eq!(request["url"], json!("/example"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.respond(&request, 200, json!({"value": 42}));

    let envelope = call.await.unwrap().unwrap();
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.payload["value"], json!(42));
    assert_eq!(correlator.pending_len(), 0);
}

/// Responses arriving in a different order than the requests were sent
/// still resolve their own callers.
pub async fn run_out_of_order_responses<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;

    let first = tokio::spawn(correlator.send(RequestSpec::get("/first")));
    let request_a = peer.next_request().await;
    let second = tokio::spawn(correlator.send(RequestSpec::get("/second")));
    let request_b = peer.next_request().await;

    peer.respond(&request_b, 200, json!({"from": "/second"}));
    peer.respond(&request_a, 200, json!({"from": "/first"}));

    let envelope_a = first.await.unwrap().unwrap();
    let envelope_b = second.await.unwrap().unwrap();
    assert_eq!(envelope_a.payload["from"], json!("/first"));
    assert_eq!(envelope_b.payload["from"], json!("/second"));
    assert_eq!(correlator.pending_len(), 0);
}

/// The success range is exactly 200..=299; everything else fails carrying
/// the same envelope shape.
pub async fn run_status_classification<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;

    for (status, expect_success) in [(200u16, true), (299, true), (300, false), (404, false), (500, false)]
    {
        let call = tokio::spawn(correlator.send(RequestSpec::get("/classify")));
        let request = peer.next_request().await;
        peer.respond(&request, status, json!({"echo": status}));

        let result = call.await.unwrap();
        if expect_success {
            let envelope = result.unwrap();
            assert_eq!(envelope.status, status);
            assert_eq!(envelope.payload["echo"], json!(status));
        } else {
            let err = result.unwrap_err();
            let envelope = err.envelope().expect("status failure carries an envelope");
            assert_eq!(envelope.status, status);
            assert_eq!(envelope.payload["echo"], json!(status));
        }
    }
}

/// An unanswered request fails with the timeout sentinel once its deadline
/// passes, and not before.
pub async fn run_timeout_expiry<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig {
        timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(10),
    })
    .await;

    let started = Instant::now();
    let call = tokio::spawn(correlator.send(RequestSpec::get("/never")));
    let _request = peer.next_request().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.status, STATUS_TIMED_OUT);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(correlator.pending_len(), 0);
}

/// Two concurrent cacheable reads of one target cross the wire once and
/// both observe the same contents.
pub async fn run_single_flight<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;

    let spec = || RequestSpec::get("/feed").with_cache(CacheMode::Default);
    let first = tokio::spawn(correlator.send(spec()));
    let second = tokio::spawn(correlator.send(spec()));

    let request = peer.next_request().await;
    // Give a duplicate transmission time to show up if one were coming.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(peer.try_next_request().is_none());

    peer.respond(&request, 200, json!({"items": [1, 2, 3]}));
    let envelope_a = first.await.unwrap().unwrap();
    let envelope_b = second.await.unwrap().unwrap();
    assert_eq!(envelope_a.payload, envelope_b.payload);

    // Later calls are served from the snapshot without touching the wire.
    let envelope_c = correlator.send(spec()).await.unwrap();
    assert_eq!(envelope_c.payload, envelope_a.payload);
    assert!(peer.try_next_request().is_none());
}

/// A failed cacheable read leaves no snapshot behind; the next call
/// transmits anew and can succeed.
pub async fn run_cache_eviction_on_failure<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;
    let spec = || RequestSpec::get("/flaky").with_cache(CacheMode::Default);

    let call = tokio::spawn(correlator.send(spec()));
    let request = peer.next_request().await;
    peer.respond(&request, 500, json!({"error": "boom"}));
    assert!(call.await.unwrap().is_err());

    let retry = tokio::spawn(correlator.send(spec()));
    let request = peer.next_request().await;
    peer.respond(&request, 200, json!({"ok": true}));
    let envelope = retry.await.unwrap().unwrap();
    assert_eq!(envelope.payload["ok"], json!(true));
}

/// A response for an identifier that was never issued is counted and
/// dropped; the connection keeps working.
pub async fn run_unmatched_id_tolerance<F: ChannelFactory>() {
    let (correlator, mut peer) = connect::<F>(CorrelatorConfig::default()).await;

    peer.send(json!({ID_FIELD: "never-issued", STATUS_FIELD: 200, "stray": true}));

    let call = tokio::spawn(correlator.send(RequestSpec::get("/after")));
    let request = peer.next_request().await;
    peer.respond(&request, 200, json!({"fine": true}));

    let envelope = call.await.unwrap().unwrap();
    assert_eq!(envelope.payload["fine"], json!(true));
    assert_eq!(correlator.unmatched_responses(), 1);
}
