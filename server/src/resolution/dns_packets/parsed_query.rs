use std::fmt::Display;

use super::ParsedPacket;
use simple_dns::{PacketFlag, Question};

#[derive(thiserror::Error, Debug)]
pub enum ParseQueryError {
    #[error("Dns packet parse error: {0}")]
    Parse(#[from] simple_dns::SimpleDnsError),

    #[error("Query validation error: {0}.")]
    Validation(&'static str),
}

/// Identity of a query for caching purposes. Only the question counts,
/// the transaction id and any EDNS data are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl CacheKey {
    pub fn from_question(question: &Question) -> Self {
        Self {
            qname: question.qname.to_string(),
            qtype: u16::from(question.qtype),
            qclass: u16::from(question.qclass),
        }
    }

    /// Last two labels of the name. Used to group requests by domain.
    pub fn domain_suffix(&self) -> String {
        let labels: Vec<&str> = self.qname.split('.').filter(|label| !label.is_empty()).collect();
        if labels.len() < 2 {
            return self.qname.clone();
        }
        labels[labels.len() - 2..].join(".")
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.qname, self.qtype, self.qclass)
    }
}

/// A query with exactly one question.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub packet: ParsedPacket,
}

impl ParsedQuery {
    /// Create a new parsed query.
    pub fn new(bytes: Vec<u8>) -> Result<Self, ParseQueryError> {
        let packet = ParsedPacket::new(bytes)?;
        let me = Self { packet };
        me.validate()?;
        Ok(me)
    }

    /// Checks if this packet is valid.
    fn validate(&self) -> Result<(), ParseQueryError> {
        if !self.packet.is_query() {
            return Err(ParseQueryError::Validation("Packet is not a query"));
        }
        match self.packet.parsed().questions.len() {
            0 => Err(ParseQueryError::Validation("Packet without a question")),
            1 => Ok(()),
            _ => Err(ParseQueryError::Validation("Packet with more than one question")),
        }
    }

    pub fn id(&self) -> u16 {
        self.packet.id()
    }

    pub fn question(&self) -> &Question {
        // Validated on construction.
        &self.packet.parsed().questions[0]
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_question(self.question())
    }

    pub fn is_recursion_desired(&self) -> bool {
        self.packet.parsed().has_flags(PacketFlag::RECURSION_DESIRED)
    }
}

impl Display for ParsedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let question = self.question();
        write!(
            f,
            "{} {:?} {:?} id={} rd={}",
            question.qname,
            question.qtype,
            question.qclass,
            self.id(),
            self.is_recursion_desired()
        )
    }
}

impl TryFrom<ParsedPacket> for ParsedQuery {
    type Error = ParseQueryError;
    fn try_from(value: ParsedPacket) -> Result<Self, Self::Error> {
        let me = Self { packet: value };
        me.validate()?;
        Ok(me)
    }
}

impl From<ParsedQuery> for ParsedPacket {
    fn from(val: ParsedQuery) -> Self {
        val.packet
    }
}

#[cfg(test)]
mod tests {
    use simple_dns::{rdata::OPT, rdata::OPTCode, Name, Packet, PacketFlag, Question, CLASS, QCLASS, QTYPE, TYPE};
    use std::borrow::Cow;

    use super::*;

    fn build_query(id: u16, name: &str, qtype: TYPE) -> Packet<'static> {
        let mut query = Packet::new_query(id);
        let question = Question::new(
            Name::new_unchecked(name).into_owned(),
            QTYPE::TYPE(qtype),
            QCLASS::CLASS(CLASS::IN),
            false,
        );
        query.questions = vec![question];
        query.set_flags(PacketFlag::RECURSION_DESIRED);
        query
    }

    #[test]
    fn new() {
        let raw_query = build_query(0, "example.com", TYPE::A).build_bytes_vec_compressed().unwrap();
        let parsed = ParsedQuery::new(raw_query).unwrap();
        assert_eq!(parsed.question().qname.to_string(), "example.com");
        assert!(parsed.is_recursion_desired());
    }

    #[test]
    fn tryfrom_parsed_packet() {
        let raw_query = build_query(0, "example.com", TYPE::A).build_bytes_vec_compressed().unwrap();
        let parsed = ParsedPacket::new(raw_query).unwrap();
        let parsed_query: Result<ParsedQuery, _> = parsed.try_into();
        assert!(parsed_query.is_ok());
    }

    #[test]
    fn reject_query_without_question() {
        let raw_query = Packet::new_query(1).build_bytes_vec().unwrap();
        let result = ParsedQuery::new(raw_query);
        assert!(matches!(result, Err(ParseQueryError::Validation(_))));
    }

    #[test]
    fn reject_reply() {
        let mut reply = Packet::new_reply(1);
        reply.questions = build_query(1, "example.com", TYPE::A).questions;
        let result = ParsedQuery::new(reply.build_bytes_vec().unwrap());
        assert!(matches!(result, Err(ParseQueryError::Validation(_))));
    }

    #[test]
    fn cache_key_ignores_id_and_extensions() {
        let plain = build_query(1, "example.com", TYPE::A);
        let mut with_opt = build_query(999, "example.com", TYPE::A);
        *with_opt.opt_mut() = Some(OPT {
            opt_codes: vec![OPTCode {
                code: 65001,
                data: Cow::Owned(vec![1, 2, 3]),
            }],
            udp_packet_size: 1232,
            version: 0,
        });

        let plain = ParsedQuery::new(plain.build_bytes_vec().unwrap()).unwrap();
        let with_opt = ParsedQuery::new(with_opt.build_bytes_vec().unwrap()).unwrap();
        assert_eq!(plain.cache_key(), with_opt.cache_key());
    }

    #[test]
    fn cache_key_differs_by_type() {
        let a = ParsedQuery::new(build_query(1, "example.com", TYPE::A).build_bytes_vec().unwrap()).unwrap();
        let aaaa = ParsedQuery::new(build_query(1, "example.com", TYPE::AAAA).build_bytes_vec().unwrap()).unwrap();
        assert_ne!(a.cache_key(), aaaa.cache_key());
    }

    #[test]
    fn domain_suffix() {
        let query = ParsedQuery::new(build_query(1, "www.mail.example.com", TYPE::A).build_bytes_vec().unwrap()).unwrap();
        assert_eq!(query.cache_key().domain_suffix(), "example.com");

        let query = ParsedQuery::new(build_query(1, "localhost", TYPE::A).build_bytes_vec().unwrap()).unwrap();
        assert_eq!(query.cache_key().domain_suffix(), "localhost");
    }
}
