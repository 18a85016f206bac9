use super::proxy::EnrichmentProxy;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::{net::UdpSocket, sync::oneshot};

/// Largest datagram we read from clients.
const MAX_QUERY_SIZE: usize = 4096;

/// Any error related to receiving and sending DNS packets on the UDP socket.
#[derive(thiserror::Error, Debug)]
pub enum DnsSocketError {
    #[error(transparent)]
    IO(#[from] tokio::io::Error),
}

/**
 * DNS UDP socket clients send their queries to.
 * Every query is processed in its own task.
 */
#[derive(Debug, Clone)]
pub struct DnsSocket {
    socket: Arc<UdpSocket>,
    proxy: EnrichmentProxy,
}

impl DnsSocket {
    /// Binds the UDP socket clients send their queries to.
    pub async fn new(listening: SocketAddr, proxy: EnrichmentProxy) -> tokio::io::Result<Self> {
        let socket = UdpSocket::bind(listening).await?;
        Ok(Self {
            socket: Arc::new(socket),
            proxy,
        })
    }

    pub fn local_addr(&self) -> tokio::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends a datagram to `target`.
    pub async fn send_to(&self, buffer: &[u8], target: &SocketAddr) -> tokio::io::Result<usize> {
        self.socket.send_to(buffer, target).await
    }

    /// Starts the receive loop in the background.
    /// Returns the sender to stop the loop again.
    pub fn start_receive_loop(&self) -> oneshot::Sender<()> {
        let cloned = self.clone();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut cancel = rx;
            loop {
                tokio::select! {
                    _ = &mut cancel => {
                        tracing::trace!("Stop UDP receive loop.");
                        break;
                    }
                    result = cloned.receive_datagram() => {
                        if let Err(err) = result {
                            tracing::error!("Error while trying to receive. {err}");
                        }
                    }
                }
            }
        });
        tx
    }

    async fn receive_datagram(&self) -> Result<(), DnsSocketError> {
        let mut buffer = [0; MAX_QUERY_SIZE];
        let (size, from) = self.socket.recv_from(&mut buffer).await?;
        let data = buffer[..size].to_vec();

        let socket = self.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let Some(reply) = socket.proxy.handle_raw(data, Some(from.ip())).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, &from).await {
                tracing::warn!("Failed to send reply to {from}. {e}");
                return;
            }
            tracing::trace!("Replied to {from} within {}ms.", start.elapsed().as_millis());
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::{
        category_client::{CategoryClient, CategoryList},
        edns::{find_option, ClientSubnet, CATEGORY_OPTION_CODE, CLIENT_SUBNET_OPTION_CODE},
        response_cache::ResponseCache,
        testing::{example_query, spawn_category_service, CategoryServiceBehaviour, MockUpstream, UpstreamBehaviour},
        upstream::UdpExchanger,
    };
    use simple_dns::{Packet, RCODE};
    use std::time::Duration;
    use tracing_test::traced_test;

    async fn start_socket(upstream: SocketAddr, category_url: &str, category_timeout: Duration) -> DnsSocket {
        let cache = ResponseCache::new(64, 60).unwrap();
        let categories = CategoryClient::new(category_url, category_timeout).unwrap();
        let exchanger = UdpExchanger::new(upstream, Duration::from_millis(500), Duration::from_millis(500));
        let proxy = EnrichmentProxy::new(cache, categories, exchanger);
        DnsSocket::new("127.0.0.1:0".parse().unwrap(), proxy).await.unwrap()
    }

    async fn ask(server: SocketAddr, query: &[u8]) -> Packet<'static> {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(query, server).await.unwrap();
        let mut buffer = [0; 4096];
        let (size, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buffer))
            .await
            .expect("Reply within 5s")
            .unwrap();
        let bytes: &'static [u8] = Box::leak(buffer[..size].to_vec().into_boxed_slice());
        Packet::parse(bytes).unwrap()
    }

    #[traced_test]
    #[tokio::test]
    async fn end_to_end_enriched_forward_and_cache() {
        let upstream = MockUpstream::start(UpstreamBehaviour::Answer { ttl: 120 }).await;
        let category_url = spawn_category_service(CategoryServiceBehaviour::Categories(vec![32, 21, 34])).await;
        let socket = start_socket(upstream.addr(), &category_url, Duration::from_secs(2)).await;
        let server = socket.local_addr().unwrap();
        let stop = socket.start_receive_loop();

        let reply = ask(server, &example_query(1234, "example.com")).await;
        assert_eq!(reply.id(), 1234);
        assert_eq!(reply.rcode(), RCODE::NoError);
        assert_eq!(reply.answers.len(), 1);

        let forwarded = upstream.received();
        assert_eq!(forwarded.len(), 1);
        let subnet = find_option(&forwarded[0], CLIENT_SUBNET_OPTION_CODE).unwrap().unwrap();
        let subnet = ClientSubnet::from_bytes(&subnet).unwrap();
        assert_eq!(subnet.family, 1);
        assert_eq!(subnet.address, vec![127, 0, 0, 1]);
        let payload = find_option(&forwarded[0], CATEGORY_OPTION_CODE).unwrap().unwrap();
        let categories: CategoryList = serde_json::from_slice(&payload).unwrap();
        assert_eq!(categories.categories, vec![32, 21, 34]);

        // Second query is served from the cache.
        let reply = ask(server, &example_query(4321, "example.com")).await;
        assert_eq!(reply.id(), 4321);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(upstream.received().len(), 1);
        assert!(logs_contain("Cache hit for"));

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn end_to_end_category_timeout_still_resolves() {
        let upstream = MockUpstream::start(UpstreamBehaviour::Answer { ttl: 120 }).await;
        let category_url = spawn_category_service(CategoryServiceBehaviour::Delay(Duration::from_secs(5))).await;
        let socket = start_socket(upstream.addr(), &category_url, Duration::from_millis(200)).await;
        let server = socket.local_addr().unwrap();
        let stop = socket.start_receive_loop();

        let reply = ask(server, &example_query(7, "slow.example.com")).await;
        assert_eq!(reply.id(), 7);
        assert_eq!(reply.rcode(), RCODE::NoError);

        let forwarded = upstream.received();
        assert!(find_option(&forwarded[0], CLIENT_SUBNET_OPTION_CODE).unwrap().is_some());
        assert!(find_option(&forwarded[0], CATEGORY_OPTION_CODE).unwrap().is_none());

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn end_to_end_upstream_down_servfail() {
        let upstream = MockUpstream::start(UpstreamBehaviour::Silent).await;
        let category_url = spawn_category_service(CategoryServiceBehaviour::Categories(vec![])).await;
        let socket = start_socket(upstream.addr(), &category_url, Duration::from_secs(2)).await;
        let server = socket.local_addr().unwrap();
        let stop = socket.start_receive_loop();

        let reply = ask(server, &example_query(999, "down.example.com")).await;
        assert_eq!(reply.id(), 999);
        assert_eq!(reply.rcode(), RCODE::ServerFailure);

        let _ = stop.send(());
    }
}
