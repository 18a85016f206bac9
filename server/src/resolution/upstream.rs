use async_trait::async_trait;
use dyn_clone::DynClone;
use rand::Rng;
use simple_dns::SimpleDnsError;
use std::{
    fmt::Debug,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use tokio::net::UdpSocket;

use super::{dns_packets::ParsedPacket, helpers::replace_packet_id};

/// Largest reply we accept from the upstream resolver.
const MAX_REPLY_SIZE: usize = 4096;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("Dns packet parse error: {0}")]
    Parse(#[from] SimpleDnsError),

    #[error(transparent)]
    IO(#[from] tokio::io::Error),

    #[error("Timeout. Failed to send the query to the upstream resolver.")]
    WriteTimeout,

    #[error("Timeout. No answer received from the upstream resolver.")]
    ReadTimeout,
}

/**
 * Sends a query to the upstream resolver and waits for the matching reply.
 * Must be clonable so it can be used by multiple tasks.
 */
#[async_trait]
pub trait UpstreamExchange: DynClone + Debug + Send + Sync {
    /// Returned reply carries the id of `query`.
    async fn exchange(&self, query: &[u8]) -> Result<ParsedPacket, UpstreamError>;
}

dyn_clone::clone_trait_object!(UpstreamExchange);

/// Forwards queries over UDP to one fixed resolver. No retries.
#[derive(Debug, Clone)]
pub struct UdpExchanger {
    upstream: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl UdpExchanger {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(upstream: SocketAddr, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            upstream,
            read_timeout,
            write_timeout,
        }
    }

    /// Ephemeral socket of the same address family as the upstream.
    async fn bind_socket(&self) -> tokio::io::Result<UdpSocket> {
        let local: SocketAddr = match self.upstream {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.upstream).await?;
        Ok(socket)
    }

    /// Waits until a reply with `forward_id` arrives. Anything else is dropped.
    async fn receive_reply(&self, socket: &UdpSocket, forward_id: u16) -> Result<ParsedPacket, UpstreamError> {
        let mut buffer = vec![0; MAX_REPLY_SIZE];
        loop {
            let size = socket.recv(&mut buffer).await?;
            let packet = match ParsedPacket::new(buffer[..size].to_vec()) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::debug!("Dropped unparseable datagram from upstream {}. {e}", self.upstream);
                    continue;
                }
            };
            if packet.is_reply() && packet.id() == forward_id {
                return Ok(packet);
            }
            tracing::debug!(
                "Dropped upstream packet with unexpected id={} forward_id={forward_id}.",
                packet.id()
            );
        }
    }
}

#[async_trait]
impl UpstreamExchange for UdpExchanger {
    async fn exchange(&self, query: &[u8]) -> Result<ParsedPacket, UpstreamError> {
        let original = ParsedPacket::new(query.to_vec())?;
        let original_id = original.id();
        let forward_id: u16 = rand::thread_rng().gen();
        let forward_query = replace_packet_id(query, forward_id)?;
        tracing::trace!(
            "Forward to upstream {}. original_id={original_id} forward_id={forward_id}",
            self.upstream
        );

        let socket = self.bind_socket().await?;
        tokio::time::timeout(self.write_timeout, socket.send(&forward_query))
            .await
            .map_err(|_| UpstreamError::WriteTimeout)??;

        let reply = tokio::time::timeout(self.read_timeout, self.receive_reply(&socket, forward_id))
            .await
            .map_err(|_| UpstreamError::ReadTimeout)??;

        let reply = replace_packet_id(reply.raw_bytes(), original_id)?;
        Ok(ParsedPacket::new(reply)?)
    }
}
