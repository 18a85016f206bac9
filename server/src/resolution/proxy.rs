use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use simple_dns::{SimpleDnsError, RCODE};

use super::{
    category_client::{CategoryError, CategoryList, CategoryLookup},
    dns_packets::{ParsedPacket, ParsedQuery},
    edns::augment_best_effort,
    helpers::replace_packet_id,
    observer::{ProxyObserver, RequestOutcome, TracingObserver},
    response_cache::ResponseCache,
    upstream::{UpstreamError, UpstreamExchange},
};

/// Errors that prevent any reply from being built.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("Dns packet error: {0}")]
    Packet(#[from] SimpleDnsError),
}

/**
 * Request pipeline. Answers from the cache or enriches the query with the
 * client subnet and the client's categories before forwarding it upstream.
 * Cheap to clone; all clones share the same cache.
 */
#[derive(Debug, Clone)]
pub struct EnrichmentProxy {
    cache: ResponseCache,
    categories: Box<dyn CategoryLookup>,
    upstream: Box<dyn UpstreamExchange>,
    observer: Arc<dyn ProxyObserver>,
}

impl EnrichmentProxy {
    pub fn new(
        cache: ResponseCache,
        categories: impl CategoryLookup + 'static,
        upstream: impl UpstreamExchange + 'static,
    ) -> Self {
        Self {
            cache,
            categories: Box::new(categories),
            upstream: Box::new(upstream),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the default tracing observer.
    pub fn with_observer(mut self, observer: Arc<dyn ProxyObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[cfg(test)]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Handles a raw datagram. Returns None if the bytes aren't a dns packet at all
    /// or if the packet is a reply. Queries without exactly one question get a FORMERR.
    pub async fn handle_raw(&self, bytes: Vec<u8>, from: Option<IpAddr>) -> Option<Vec<u8>> {
        let packet = match ParsedPacket::new(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Failed to parse packet from {from:?}. {e} Drop.");
                return None;
            }
        };
        self.handle_packet(packet, from).await
    }

    /// Handles a parsed packet. See [`Self::handle_raw`].
    pub async fn handle_packet(&self, packet: ParsedPacket, from: Option<IpAddr>) -> Option<Vec<u8>> {
        if packet.is_reply() {
            tracing::debug!("Received reply from {from:?} id={}. Ignore.", packet.id());
            return None;
        }
        let reply = match ParsedQuery::try_from(packet.clone()) {
            Ok(query) => self.handle_query(&query, from).await,
            Err(e) => {
                tracing::debug!("Reject malformed query from {from:?} id={}. {e}", packet.id());
                packet.create_format_error_reply().map_err(ProxyError::from)
            }
        };
        match reply {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!("Failed to build reply for {from:?}. {e}");
                None
            }
        }
    }

    /// Resolves a query. Always ends in a reply for the requester unless the reply itself
    /// can't be serialized.
    pub async fn handle_query(&self, query: &ParsedQuery, from: Option<IpAddr>) -> Result<Vec<u8>, ProxyError> {
        let start = Instant::now();
        let key = query.cache_key();
        self.observer.request_received(&key);
        tracing::debug!("Received query {query} from {from:?}");
        // Dual stack sockets report IPv4 clients as IPv4-mapped IPv6 addresses.
        let from = from.map(|ip| ip.to_canonical());

        if let Some(cached) = self.cache.get(&key) {
            self.observer.cache_hit(&key);
            self.observer.response_code(RCODE::NoError);
            let reply = replace_packet_id(&cached, query.id())?;
            let ttl_left = self.cache.remaining_ttl(&key).unwrap_or_default();
            tracing::debug!("Cache hit for {query} ttl_left={}s", ttl_left.as_secs());
            self.complete(RequestOutcome::CacheHit, start);
            return Ok(reply);
        }
        self.observer.cache_miss(&key);

        let categories = match from {
            Some(ip) => match self.lookup_categories(ip).await {
                Ok(categories) => Some(categories),
                Err(e) => {
                    tracing::warn!("Error fetching categories for {ip}. {e} Continue without categories.");
                    None
                }
            },
            None => None,
        };

        let augmented = augment_best_effort(query.packet.raw_bytes(), from, categories.as_ref());
        if augmented.categories_added {
            self.observer.extension_added();
        }
        tracing::trace!(
            "Forward {query} client_subnet={} categories={:?}",
            augmented.client_subnet_added,
            categories.as_ref().map(|list| &list.categories)
        );

        let upstream_start = Instant::now();
        let response = match self.upstream.exchange(&augmented.bytes).await {
            Ok(response) => {
                self.observer.upstream_exchange(upstream_start.elapsed(), true);
                response
            }
            Err(e) => {
                self.observer.upstream_exchange(upstream_start.elapsed(), false);
                return self.fail(query, e, start);
            }
        };

        self.finalize(query, response, start)
    }

    async fn lookup_categories(&self, ip: IpAddr) -> Result<CategoryList, CategoryError> {
        let lookup_start = Instant::now();
        let result = self.categories.resolve(ip).await;
        self.observer.category_lookup(lookup_start.elapsed(), result.is_ok());
        if let Ok(categories) = &result {
            if !categories.is_empty() {
                self.observer.categories_received(categories);
            }
        }
        result
    }

    /// Upstream failed. Answer with SRVFAIL under the original query's identity.
    fn fail(&self, query: &ParsedQuery, error: UpstreamError, start: Instant) -> Result<Vec<u8>, ProxyError> {
        tracing::warn!("Error querying upstream for {query}. {error}");
        let reply = query.packet.create_server_fail_reply()?;
        self.complete(RequestOutcome::Failure, start);
        Ok(reply)
    }

    fn finalize(&self, query: &ParsedQuery, response: ParsedPacket, start: Instant) -> Result<Vec<u8>, ProxyError> {
        let response = ParsedPacket::new(replace_packet_id(response.raw_bytes(), query.id())?)?;
        self.observer.response_code(response.rcode());
        if self.cache.insert(query.cache_key(), &response) {
            self.observer.cache_size(self.cache.len());
        }
        self.complete(RequestOutcome::Success, start);
        Ok(response.into())
    }

    fn complete(&self, outcome: RequestOutcome, start: Instant) {
        let elapsed: Duration = start.elapsed();
        self.observer.request_completed(outcome, elapsed);
    }
}
