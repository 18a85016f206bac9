use self_cell::self_cell;
use simple_dns::{Packet, PacketFlag, SimpleDnsError, RCODE};

// Struct to hold the bytes and the packet in one place
// to avoid lifetimes aka a self-referencing struct.
self_cell!(
    pub struct Inner {
        owner: Vec<u8>,

        #[covariant]
        dependent: Packet,
    }

    impl {Debug}
);

impl Inner {
    /// Try to parse the packet from bytes
    pub fn try_from_bytes(bytes: Vec<u8>) -> Result<Self, SimpleDnsError> {
        Self::try_new(bytes, |bytes| Packet::parse(bytes))
    }

    /// Parsed DNS packet
    pub fn packet(&self) -> &Packet {
        self.borrow_dependent()
    }

    /// Raw bytes the packet is build with
    pub fn raw_bytes(&self) -> &Vec<u8> {
        self.borrow_owner()
    }
}

impl Clone for Inner {
    fn clone(&self) -> Self {
        // The bytes already parsed once so parsing the copy can't fail.
        Self::new(self.raw_bytes().clone(), |bytes| {
            Packet::parse(bytes).expect("Previously parsed bytes are always valid.")
        })
    }
}

impl From<Inner> for Vec<u8> {
    fn from(val: Inner) -> Self {
        val.into_owner()
    }
}

/// Parses a dns packet without having to deal with life times
/// Both the raw bytes and the parsed struct is contained.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub inner: Inner,
}

impl ParsedPacket {
    pub fn new(raw_bytes: Vec<u8>) -> Result<Self, SimpleDnsError> {
        let inner = Inner::try_from_bytes(raw_bytes)?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> u16 {
        self.parsed().id()
    }

    /// Parsed DNS packet
    pub fn parsed(&self) -> &Packet {
        self.inner.packet()
    }

    /// Raw bytes the packet is build with
    pub fn raw_bytes(&self) -> &Vec<u8> {
        self.inner.raw_bytes()
    }

    /// If this packet is a reply
    pub fn is_reply(&self) -> bool {
        self.parsed().has_flags(PacketFlag::RESPONSE)
    }

    /// If this packet is a query
    pub fn is_query(&self) -> bool {
        !self.parsed().has_flags(PacketFlag::RESPONSE)
    }

    pub fn rcode(&self) -> RCODE {
        self.parsed().rcode()
    }

    /// Lowest ttl of all answers. None if the packet has no answers.
    pub fn lowest_answer_ttl(&self) -> Option<u32> {
        self.parsed().answers.iter().map(|answer| answer.ttl).min()
    }

    /// Create a SRVFAIL reply that echoes the id and the question of this packet.
    pub fn create_server_fail_reply(&self) -> Result<Vec<u8>, SimpleDnsError> {
        self.create_error_reply(RCODE::ServerFailure)
    }

    /// Create a FORMERR reply that echoes the id and the question of this packet.
    pub fn create_format_error_reply(&self) -> Result<Vec<u8>, SimpleDnsError> {
        self.create_error_reply(RCODE::FormatError)
    }

    fn create_error_reply(&self, rcode: RCODE) -> Result<Vec<u8>, SimpleDnsError> {
        let query = self.parsed();
        let mut reply = Packet::new_reply(query.id());
        reply.questions = query.questions.clone();
        if query.has_flags(PacketFlag::RECURSION_DESIRED) {
            reply.set_flags(PacketFlag::RECURSION_DESIRED);
        }
        *reply.rcode_mut() = rcode;
        reply.build_bytes_vec_compressed()
    }
}

impl From<ParsedPacket> for Vec<u8> {
    fn from(val: ParsedPacket) -> Self {
        val.inner.into()
    }
}
