//! Routing facade.
//!
//! A single request entry point that decides, per target, whether a request
//! travels over the correlated channel or through a caller-supplied
//! fallback path. The default is the fallback: only targets a policy
//! explicitly includes ride the channel, so a misconfigured pattern list
//! degrades to ordinary behavior instead of black-holing traffic.

use std::future::Future;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::{CallError, Channel, Correlator, Method, RequestSpec, ResponseEnvelope};

/// Where a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Over the correlated channel.
    Correlated,
    /// Through the fallback path.
    Fallback,
}

/// Pattern-based routing decisions over the request target.
///
/// Exclusion wins over inclusion; a target matching neither list takes the
/// fallback.
#[derive(Debug, Default)]
pub struct RoutePolicy {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl RoutePolicy {
    pub fn new(include: Vec<Regex>, exclude: Vec<Regex>) -> Self {
        Self { include, exclude }
    }

    /// Route everything over the correlated channel except `exclude` matches.
    pub fn include_all(exclude: Vec<Regex>) -> Self {
        // The unanchored empty pattern matches every target and can't fail
        // to compile.
        #[allow(clippy::unwrap_used)]
        Self::new(vec![Regex::new("").unwrap()], exclude)
    }

    pub fn route(&self, target: &str) -> Route {
        if self.exclude.iter().any(|re| re.is_match(target)) {
            return Route::Fallback;
        }
        if self.include.iter().any(|re| re.is_match(target)) {
            return Route::Correlated;
        }
        Route::Fallback
    }
}

/// The non-correlated request path taken when the policy routes away from
/// the channel. Typically an ordinary HTTP client adapter.
pub trait Fallback {
    fn call(
        &self,
        spec: RequestSpec,
    ) -> impl Future<Output = Result<ResponseEnvelope, CallError>> + Send;
}

/// Drop-in request surface over a correlator, a fallback and a policy.
pub struct Facade<C: Channel, F: Fallback> {
    correlator: Arc<Correlator<C>>,
    fallback: F,
    policy: RoutePolicy,
}

impl<C, F> Facade<C, F>
where
    C: Channel + Send + Sync + 'static,
    F: Fallback,
{
    pub fn new(correlator: Arc<Correlator<C>>, fallback: F, policy: RoutePolicy) -> Self {
        Self {
            correlator,
            fallback,
            policy,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator<C>> {
        &self.correlator
    }

    /// Route `spec` per the policy and execute it. Both paths produce the
    /// same envelope shape.
    pub async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, CallError> {
        match self.policy.route(&spec.target) {
            Route::Correlated => {
                tracing::trace!(target = %spec.target, "routing over correlated channel");
                self.correlator.send(spec).await
            }
            Route::Fallback => {
                tracing::trace!(target = %spec.target, "routing through fallback");
                self.fallback.call(spec).await
            }
        }
    }

    pub async fn get(&self, target: impl Into<String>) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::get(target)).await
    }

    pub async fn head(&self, target: impl Into<String>) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::new(Method::Head, target)).await
    }

    pub async fn delete(&self, target: impl Into<String>) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::new(Method::Delete, target)).await
    }

    pub async fn post(
        &self,
        target: impl Into<String>,
        body: Value,
    ) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::new(Method::Post, target).with_body(body))
            .await
    }

    pub async fn put(
        &self,
        target: impl Into<String>,
        body: Value,
    ) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::new(Method::Put, target).with_body(body))
            .await
    }

    pub async fn patch(
        &self,
        target: impl Into<String>,
        body: Value,
    ) -> Result<ResponseEnvelope, CallError> {
        self.request(RequestSpec::new(Method::Patch, target).with_body(body))
            .await
    }
}
