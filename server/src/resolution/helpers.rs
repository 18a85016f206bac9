use simple_dns::{Packet, SimpleDnsError};

/// Replaces the id of a dns packet. Everything else stays byte-for-byte the same.
pub fn replace_packet_id(packet: &[u8], new_id: u16) -> Result<Vec<u8>, SimpleDnsError> {
    Packet::parse(packet)?;
    let mut cloned = packet.to_vec();
    cloned[..2].copy_from_slice(&new_id.to_be_bytes());
    Ok(cloned)
}
