//! Adds EDNS(0) options to forwarded queries: the client subnet (RFC 7871)
//! and the client's categories as a private option.

use std::{borrow::Cow, net::IpAddr};

use simple_dns::{
    rdata::{OPTCode, OPT},
    Packet, SimpleDnsError,
};

use super::category_client::CategoryList;

/// EDNS Client Subnet option code.
pub const CLIENT_SUBNET_OPTION_CODE: u16 = 8;
/// Private use option code carrying the JSON encoded categories.
pub const CATEGORY_OPTION_CODE: u16 = 65050;
/// Advertised UDP payload size of a newly created OPT record.
pub const DEFAULT_UDP_PAYLOAD_SIZE: u16 = 4096;

#[derive(thiserror::Error, Debug)]
pub enum EdnsError {
    #[error("Dns packet error: {0}")]
    Packet(#[from] SimpleDnsError),

    #[error("Failed to serialize categories: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Client subnet option payload. Always describes a single address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubnet {
    pub family: u16,
    pub source_prefix: u8,
    pub scope_prefix: u8,
    pub address: Vec<u8>,
}

impl ClientSubnet {
    pub fn from_ip(ip: IpAddr) -> Self {
        // IPv4-mapped IPv6 addresses from dual stack sockets count as IPv4.
        match ip.to_canonical() {
            IpAddr::V4(ip) => Self {
                family: 1,
                source_prefix: 32,
                scope_prefix: 0,
                address: ip.octets().to_vec(),
            },
            IpAddr::V6(ip) => Self {
                family: 2,
                source_prefix: 128,
                scope_prefix: 0,
                address: ip.octets().to_vec(),
            },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.address.len());
        bytes.extend_from_slice(&self.family.to_be_bytes());
        bytes.push(self.source_prefix);
        bytes.push(self.scope_prefix);
        bytes.extend_from_slice(&self.address);
        bytes
    }

    /// Decodes an option payload. None if it is shorter than the fixed header.
    #[cfg(test)]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        Some(Self {
            family: u16::from_be_bytes([bytes[0], bytes[1]]),
            source_prefix: bytes[2],
            scope_prefix: bytes[3],
            address: bytes[4..].to_vec(),
        })
    }
}

/// Returns the OPT record of the packet. Creates an empty one if missing.
fn opt_record<'a, 'b>(packet: &'b mut Packet<'a>) -> &'b mut OPT<'a> {
    packet.opt_mut().get_or_insert_with(|| OPT {
        opt_codes: Vec::new(),
        udp_packet_size: DEFAULT_UDP_PAYLOAD_SIZE,
        version: 0,
    })
}

/// Appends a client subnet option for `ip`. Existing options are kept.
pub fn append_client_subnet(packet: &mut Packet<'_>, ip: IpAddr) {
    let subnet = ClientSubnet::from_ip(ip);
    opt_record(packet).opt_codes.push(OPTCode {
        code: CLIENT_SUBNET_OPTION_CODE,
        data: Cow::Owned(subnet.to_bytes()),
    });
}

/// Appends the categories option. Returns false and leaves the packet as is if the list is empty.
pub fn append_categories(packet: &mut Packet<'_>, categories: &CategoryList) -> Result<bool, EdnsError> {
    if categories.is_empty() {
        return Ok(false);
    }
    let payload = serde_json::to_vec(categories)?;
    opt_record(packet).opt_codes.push(OPTCode {
        code: CATEGORY_OPTION_CODE,
        data: Cow::Owned(payload),
    });
    Ok(true)
}

/// Adds a client subnet option to a raw query.
/// An unparseable address returns the query byte-for-byte unmodified.
#[cfg(test)]
pub fn with_client_subnet(query: &[u8], client: &str) -> Result<Vec<u8>, EdnsError> {
    let ip: IpAddr = match client.parse() {
        Ok(ip) => ip,
        Err(_) => return Ok(query.to_vec()),
    };
    let mut packet = Packet::parse(query)?;
    append_client_subnet(&mut packet, ip);
    Ok(packet.build_bytes_vec_compressed()?)
}

/// Outcome of [`augment_query`].
#[derive(Debug, Clone)]
pub struct AugmentedQuery {
    pub bytes: Vec<u8>,
    pub client_subnet_added: bool,
    pub categories_added: bool,
}

/// Builds the query that is forwarded upstream. The original bytes are never touched;
/// if no option is added, the returned bytes are an exact copy.
pub fn augment_query(
    query: &[u8],
    client: Option<IpAddr>,
    categories: Option<&CategoryList>,
) -> Result<AugmentedQuery, EdnsError> {
    let mut packet = Packet::parse(query)?;
    let client_subnet_added = match client {
        Some(ip) => {
            append_client_subnet(&mut packet, ip);
            true
        }
        None => false,
    };
    let categories_added = match categories {
        Some(categories) => append_categories(&mut packet, categories)?,
        None => false,
    };

    let bytes = if client_subnet_added || categories_added {
        packet.build_bytes_vec_compressed()?
    } else {
        query.to_vec()
    };
    Ok(AugmentedQuery {
        bytes,
        client_subnet_added,
        categories_added,
    })
}

/// Enrichment never fails a request. If the categories can't be added the query is
/// retried with the client subnet only, and if that fails too it is forwarded unmodified.
pub fn augment_best_effort(query: &[u8], client: Option<IpAddr>, categories: Option<&CategoryList>) -> AugmentedQuery {
    match augment_query(query, client, categories) {
        Ok(augmented) => return augmented,
        Err(e) => tracing::warn!("Failed to augment query. {e}"),
    }
    if categories.is_some() {
        match augment_query(query, client, None) {
            Ok(augmented) => return augmented,
            Err(e) => tracing::warn!("Failed to add the client subnet. {e}"),
        }
    }
    tracing::warn!("Forward query without EDNS options.");
    AugmentedQuery {
        bytes: query.to_vec(),
        client_subnet_added: false,
        categories_added: false,
    }
}

/// Reads the option with `code` from a raw packet. Used to inspect forwarded queries.
#[cfg(test)]
pub fn find_option(packet: &[u8], code: u16) -> Result<Option<Vec<u8>>, SimpleDnsError> {
    let packet = Packet::parse(packet)?;
    let found = packet
        .opt()
        .and_then(|opt| opt.opt_codes.iter().find(|option| option.code == code))
        .map(|option| option.data.to_vec());
    Ok(found)
}
