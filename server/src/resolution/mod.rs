/**
 * Request pipeline of the proxy: cache, category lookup, EDNS enrichment and
 * upstream forwarding behind a UDP socket.
 */
mod category_client;
mod dns_packets;
mod dns_socket;
mod edns;
mod helpers;
mod metrics;
mod observer;
mod proxy;
mod response_cache;
mod upstream;

#[cfg(test)]
mod testing;

pub use category_client::CategoryClient;
pub use dns_socket::DnsSocket;
pub use metrics::PrometheusObserver;
pub use observer::{ObserverChain, ProxyObserver, TracingObserver};
pub use proxy::EnrichmentProxy;
pub use response_cache::ResponseCache;
pub use upstream::UdpExchanger;
