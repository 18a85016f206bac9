use std::{fmt::Debug, sync::Arc, time::Duration};

use simple_dns::RCODE;

use super::{category_client::CategoryList, dns_packets::CacheKey};

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    CacheHit,
    Success,
    Failure,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::CacheHit => "cached",
            RequestOutcome::Success => "success",
            RequestOutcome::Failure => "failed",
        }
    }
}

/**
 * Hooks into the request pipeline. Every method defaults to a no-op so an
 * implementation only picks the events it cares about.
 */
pub trait ProxyObserver: Debug + Send + Sync {
    fn request_received(&self, _key: &CacheKey) {}
    fn request_completed(&self, _outcome: RequestOutcome, _elapsed: Duration) {}
    fn cache_hit(&self, _key: &CacheKey) {}
    fn cache_miss(&self, _key: &CacheKey) {}
    fn cache_size(&self, _entries: usize) {}
    fn category_lookup(&self, _elapsed: Duration, _success: bool) {}
    fn categories_received(&self, _categories: &CategoryList) {}
    fn upstream_exchange(&self, _elapsed: Duration, _success: bool) {}
    fn response_code(&self, _rcode: RCODE) {}
    fn extension_added(&self) {}
}

/// Emits every event as a tracing event.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl ProxyObserver for TracingObserver {
    fn request_received(&self, key: &CacheKey) {
        tracing::trace!(
            qname = %key.qname,
            qtype = key.qtype,
            qclass = key.qclass,
            domain_suffix = %key.domain_suffix(),
            "Request received."
        );
    }

    fn request_completed(&self, outcome: RequestOutcome, elapsed: Duration) {
        tracing::debug!(
            status = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed."
        );
    }

    fn cache_size(&self, entries: usize) {
        tracing::trace!(entries, "Cache size.");
    }

    fn category_lookup(&self, elapsed: Duration, success: bool) {
        tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, success, "Category lookup.");
    }

    fn categories_received(&self, categories: &CategoryList) {
        tracing::trace!(categories = ?categories.categories, "Categories received.");
    }

    fn upstream_exchange(&self, elapsed: Duration, success: bool) {
        tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, success, "Upstream exchange.");
    }

    fn response_code(&self, rcode: RCODE) {
        tracing::trace!(rcode = ?rcode, "Response code.");
    }
}

/// Forwards every event to several observers.
#[derive(Debug, Default)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn ProxyObserver>>,
}

impl ObserverChain {
    pub fn new(observers: Vec<Arc<dyn ProxyObserver>>) -> Self {
        Self { observers }
    }
}

impl ProxyObserver for ObserverChain {
    fn request_received(&self, key: &CacheKey) {
        self.observers.iter().for_each(|o| o.request_received(key));
    }
    fn request_completed(&self, outcome: RequestOutcome, elapsed: Duration) {
        self.observers.iter().for_each(|o| o.request_completed(outcome, elapsed));
    }
    fn cache_hit(&self, key: &CacheKey) {
        self.observers.iter().for_each(|o| o.cache_hit(key));
    }
    fn cache_miss(&self, key: &CacheKey) {
        self.observers.iter().for_each(|o| o.cache_miss(key));
    }
    fn cache_size(&self, entries: usize) {
        self.observers.iter().for_each(|o| o.cache_size(entries));
    }
    fn category_lookup(&self, elapsed: Duration, success: bool) {
        self.observers.iter().for_each(|o| o.category_lookup(elapsed, success));
    }
    fn categories_received(&self, categories: &CategoryList) {
        self.observers.iter().for_each(|o| o.categories_received(categories));
    }
    fn upstream_exchange(&self, elapsed: Duration, success: bool) {
        self.observers.iter().for_each(|o| o.upstream_exchange(elapsed, success));
    }
    fn response_code(&self, rcode: RCODE) {
        self.observers.iter().for_each(|o| o.response_code(rcode));
    }
    fn extension_added(&self) {
        self.observers.iter().for_each(|o| o.extension_added());
    }
}
