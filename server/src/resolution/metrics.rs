use std::time::Duration;

use prometheus::{
    core::Collector, exponential_buckets, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry, TextEncoder,
};
use simple_dns::{RCODE, TYPE};

use super::{
    category_client::CategoryList,
    dns_packets::CacheKey,
    observer::{ProxyObserver, RequestOutcome},
};

/// Buckets for the category service and the upstream resolver. 5ms up to 5.12s.
fn outbound_buckets() -> Result<Vec<f64>, prometheus::Error> {
    exponential_buckets(0.005, 2.0, 11)
}

fn qtype_label(qtype: u16) -> String {
    match TYPE::from(qtype) {
        TYPE::Unknown(value) => value.to_string(),
        known => format!("{known:?}"),
    }
}

fn qclass_label(qclass: u16) -> String {
    match qclass {
        1 => "IN".to_string(),
        3 => "CH".to_string(),
        4 => "HS".to_string(),
        254 => "NONE".to_string(),
        255 => "ANY".to_string(),
        other => other.to_string(),
    }
}

fn rcode_label(rcode: RCODE) -> String {
    match rcode {
        RCODE::NoError => "NOERROR".to_string(),
        RCODE::FormatError => "FORMERR".to_string(),
        RCODE::ServerFailure => "SERVFAIL".to_string(),
        RCODE::NameError => "NXDOMAIN".to_string(),
        RCODE::NotImplemented => "NOTIMP".to_string(),
        RCODE::Refused => "REFUSED".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

/// Sum over every label combination of a counter vec.
fn counter_total(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/**
 * Prometheus metrics of the request pipeline.
 * Owns its own registry. Render it with [`PrometheusObserver::render`].
 */
pub struct PrometheusObserver {
    registry: Registry,
    requests_total: IntCounterVec,
    request_latency: HistogramVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_size: IntGauge,
    category_latency: Histogram,
    category_errors: IntCounter,
    upstream_latency: Histogram,
    upstream_errors: IntCounter,
    response_codes: IntCounterVec,
    extensions_added: IntCounter,
    categories_received: IntCounterVec,
}

impl std::fmt::Debug for PrometheusObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusObserver").finish_non_exhaustive()
    }
}

/// Point in time totals of [`PrometheusObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub successes: u64,
    pub failures: u64,
    pub category_errors: u64,
    pub upstream_errors: u64,
    pub extensions_added: u64,
}

impl PrometheusObserver {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("dns_requests_total", "Total number of DNS requests received"),
            &["qtype", "qclass", "domain_suffix"],
        )?;
        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "dns_request_latency_seconds",
                "Latency of DNS request processing in seconds",
            ),
            &["status"],
        )?;
        let cache_hits = IntCounter::new("dns_cache_hits_total", "Total number of cache hits")?;
        let cache_misses = IntCounter::new("dns_cache_misses_total", "Total number of cache misses")?;
        let cache_size = IntGauge::new("dns_cache_size", "Current number of entries in the cache")?;
        let category_latency = Histogram::with_opts(
            HistogramOpts::new(
                "dns_rest_latency_seconds",
                "Latency of category service queries in seconds",
            )
            .buckets(outbound_buckets()?),
        )?;
        let category_errors = IntCounter::new("dns_rest_errors_total", "Total number of category service errors")?;
        let upstream_latency = Histogram::with_opts(
            HistogramOpts::new(
                "dns_upstream_latency_seconds",
                "Latency of upstream DNS resolver queries in seconds",
            )
            .buckets(outbound_buckets()?),
        )?;
        let upstream_errors = IntCounter::new(
            "dns_upstream_errors_total",
            "Total number of upstream DNS resolver errors",
        )?;
        let response_codes = IntCounterVec::new(
            Opts::new("dns_response_codes_total", "Total number of DNS responses by response code"),
            &["rcode"],
        )?;
        let extensions_added = IntCounter::new(
            "dns_edns_options_added_total",
            "Total number of EDNS category options added to queries",
        )?;
        let categories_received = IntCounterVec::new(
            Opts::new("dns_categories_received_total", "Categories received from the category service"),
            &["category"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(category_latency.clone()))?;
        registry.register(Box::new(category_errors.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(response_codes.clone()))?;
        registry.register(Box::new(extensions_added.clone()))?;
        registry.register(Box::new(categories_received.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_latency,
            cache_hits,
            cache_misses,
            cache_size,
            category_latency,
            category_errors,
            upstream_latency,
            upstream_errors,
            response_codes,
            extensions_added,
            categories_received,
        })
    }

    /// Prometheus text exposition format of all metrics.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    fn completed(&self, status: &str) -> u64 {
        self.request_latency.with_label_values(&[status]).get_sample_count()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: counter_total(&self.requests_total),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            successes: self.completed(RequestOutcome::CacheHit.as_str()) + self.completed(RequestOutcome::Success.as_str()),
            failures: self.completed(RequestOutcome::Failure.as_str()),
            category_errors: self.category_errors.get(),
            upstream_errors: self.upstream_errors.get(),
            extensions_added: self.extensions_added.get(),
        }
    }
}

impl ProxyObserver for PrometheusObserver {
    fn request_received(&self, key: &CacheKey) {
        self.requests_total
            .with_label_values(&[&qtype_label(key.qtype), &qclass_label(key.qclass), &key.domain_suffix()])
            .inc();
    }

    fn request_completed(&self, outcome: RequestOutcome, elapsed: Duration) {
        self.request_latency
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn cache_hit(&self, _key: &CacheKey) {
        self.cache_hits.inc();
    }

    fn cache_miss(&self, _key: &CacheKey) {
        self.cache_misses.inc();
    }

    fn cache_size(&self, entries: usize) {
        self.cache_size.set(entries as i64);
    }

    fn category_lookup(&self, elapsed: Duration, success: bool) {
        self.category_latency.observe(elapsed.as_secs_f64());
        if !success {
            self.category_errors.inc();
        }
    }

    fn categories_received(&self, categories: &CategoryList) {
        for category in &categories.categories {
            self.categories_received
                .with_label_values(&[&category.to_string()])
                .inc();
        }
    }

    fn upstream_exchange(&self, elapsed: Duration, success: bool) {
        self.upstream_latency.observe(elapsed.as_secs_f64());
        if !success {
            self.upstream_errors.inc();
        }
    }

    fn response_code(&self, rcode: RCODE) {
        self.response_codes.with_label_values(&[&rcode_label(rcode)]).inc();
    }

    fn extension_added(&self) {
        self.extensions_added.inc();
    }
}
