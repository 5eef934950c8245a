//! The correlator: multiplexes many concurrent logical requests over one
//! channel and matches inbound responses back to their pending request by
//! identifier.
//!
//! # Architecture
//!
//! ```text
//!   caller ──send()──► pending table ──transmit()──► channel ──► wire
//!                           ▲                                     │
//!                           │ take(id), exactly once              │
//!              ┌────────────┴────────────┐                        │
//!        sweep tick                inbound response ◄─────────────┘
//!   (deadline passed)              (recognized id)
//! ```
//!
//! # Key invariant
//!
//! Only [`Correlator::run`] calls `channel.recv()`, and the run task is also
//! the one that sweeps deadlines, so inbound resolution and timeout
//! resolution are serialized. Whichever path takes a pending entry first
//! wins; the loser observes absence and no-ops. No entry resolves twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    CacheMode, CacheSlot, CallError, Channel, CorrelatorConfig, PendingEntry, PendingTable,
    RequestId, RequestSpec, ResponseCache, ResponseEnvelope, SharedCall, WireRequest,
    STATUS_TIMED_OUT, TIMED_OUT_PAYLOAD,
};

/// Why a resolution is being attempted. Both causes share one code path;
/// the cause only steers how an already-absent entry is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveCause {
    /// An inbound response with a recognized identifier.
    Reply,
    /// A sweep tick found the entry's deadline passed.
    Timeout,
}

/// Matches outbound requests to inbound responses by identifier.
///
/// Holds a shared reference to the channel; it does not manage connection
/// lifecycle. Usage mirrors a session object:
///
/// ```ignore
/// let correlator = Arc::new(Correlator::new(channel, CorrelatorConfig::default()));
/// tokio::spawn(correlator.clone().run());
/// let response = correlator.send(RequestSpec::get("/example")).await?;
/// ```
pub struct Correlator<C: Channel> {
    channel: Arc<C>,
    pending: PendingTable,
    default_cache: Arc<ResponseCache>,
    config: CorrelatorConfig,
    /// Inbound responses that matched no pending entry. Non-fatal, but a
    /// signal of duplicate resolution or malformed upstream traffic.
    unmatched: AtomicU64,
}

impl<C: Channel + Send + Sync + 'static> Correlator<C> {
    pub fn new(channel: Arc<C>, config: CorrelatorConfig) -> Self {
        Self {
            channel,
            pending: PendingTable::new(),
            default_cache: Arc::new(ResponseCache::new()),
            config,
            unmatched: AtomicU64::new(0),
        }
    }

    /// The channel this correlator sends on.
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Number of requests currently awaiting resolution.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Inbound responses observed with no matching pending request.
    pub fn unmatched_responses(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Dispatch a request. Returns a completion future immediately; the
    /// caller awaits it while resolution happens asynchronously, driven by
    /// [`Correlator::run`].
    ///
    /// Cacheable requests (pure-read method with a cache mode engaged) go
    /// through the single-flight cache: a finished snapshot resolves
    /// immediately under a freshly minted identifier, an in-flight
    /// completion is shared with the new caller, and otherwise this call
    /// transmits and registers its completion for later arrivals.
    pub fn send(self: &Arc<Self>, spec: RequestSpec) -> SharedCall {
        if !(spec.method.is_pure_read() && !spec.cache.is_off()) {
            return self.clone().dispatch(spec).boxed().shared();
        }

        let cache = match &spec.cache {
            CacheMode::Scoped(cache) => cache.clone(),
            _ => self.default_cache.clone(),
        };
        let key = spec.target.clone();

        let this = self.clone();
        let inner_cache = cache.clone();
        let inner_key = key.clone();
        let slot = cache.get_or_start(&key, move || {
            async move {
                let result = this.dispatch(spec).await;
                // Keep later lookups consistent: success becomes a
                // snapshot, failure evicts so the next call retries.
                match &result {
                    Ok(envelope) => inner_cache.put(&inner_key, envelope.clone()),
                    Err(_) => inner_cache.evict(&inner_key),
                }
                result
            }
            .boxed()
            .shared()
        });

        match slot {
            // Pre-resolve a copy of the snapshot under a fresh identifier;
            // externally this looks like any other completed call.
            CacheSlot::Finished(mut envelope) => {
                envelope.id = RequestId::generate();
                futures::future::ready(envelope.into_result()).boxed().shared()
            }
            CacheSlot::InFlight(call) => call,
        }
    }

    /// The uncached dispatch path: mint an identifier, record the pending
    /// entry, hand the tagged request to the channel, await resolution.
    async fn dispatch(self: Arc<Self>, spec: RequestSpec) -> Result<ResponseEnvelope, CallError> {
        let id = RequestId::generate();
        let (tx, rx) = oneshot::channel();

        let timeout = spec.timeout.unwrap_or(self.config.timeout);
        let deadline = (timeout > Duration::ZERO).then(|| Instant::now() + timeout);

        let wire = WireRequest::new(id.clone(), &spec);
        self.pending.insert(
            id.clone(),
            PendingEntry {
                completion: tx,
                request: spec,
                deadline,
            },
        );

        if let Err(e) = self.channel.transmit(&wire).await {
            // The entry never made it onto the wire; take it back out.
            self.pending.take(&id);
            return Err(CallError::Transmit(e.to_string()));
        }
        tracing::debug!(%id, "request transmitted");

        match rx.await {
            Ok(envelope) => envelope.into_result(),
            Err(_) => Err(CallError::ConnectionLost),
        }
    }

    /// Resolve the pending entry for `id`, exactly once. An absent entry
    /// means the other path (reply vs. timeout) already won the race, or —
    /// for replies — that the message references an identifier we never
    /// issued; either way this never crashes the process.
    fn resolve(&self, id: RequestId, status: u16, payload: Value, cause: ResolveCause) {
        let Some(entry) = self.pending.take(&id) else {
            match cause {
                ResolveCause::Reply => {
                    let total = self.unmatched.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(%id, total, "response matches no pending request");
                }
                ResolveCause::Timeout => {
                    tracing::trace!(%id, "entry resolved before sweep could time it out");
                }
            }
            return;
        };

        let envelope = ResponseEnvelope {
            id,
            payload,
            status,
            headers: HashMap::new(),
            request: entry.request,
        };
        // A dropped receiver just means the caller abandoned the wait.
        let _ = entry.completion.send(envelope);
    }

    /// Fail every entry whose deadline has passed at `now`, through the
    /// same resolution path a real reply takes. One entry's expiry never
    /// prevents scanning the rest.
    fn sweep(&self, now: Instant) {
        for id in self.pending.expired(now) {
            tracing::debug!(%id, "request deadline passed");
            self.resolve(
                id,
                STATUS_TIMED_OUT,
                Value::String(TIMED_OUT_PAYLOAD.into()),
                ResolveCause::Timeout,
            );
        }
    }

    /// The demux loop: sole consumer of `channel.recv()`, interleaved with
    /// sweep ticks. Returns when the channel closes; any requests still
    /// pending at that point observe the connection as lost.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                inbound = self.channel.recv() => match inbound {
                    Ok(Some(wire)) => {
                        let status = wire.status_or_default();
                        self.resolve(
                            wire.request_id,
                            status,
                            Value::Object(wire.payload),
                            ResolveCause::Reply,
                        );
                    }
                    Ok(None) => {
                        tracing::debug!("channel closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("channel receive failed: {e}");
                        break;
                    }
                },
                _ = ticker.tick() => self.sweep(Instant::now()),
            }
        }

        let abandoned = self.pending.drain();
        if !abandoned.is_empty() {
            tracing::debug!(
                pending = abandoned.len(),
                "connection closed with requests still pending"
            );
        }
    }
}
