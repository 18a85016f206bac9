//! In-process stand-ins for the upstream resolver and the category service.

use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use simple_dns::{
    rdata::{RData, A},
    Name, Packet, PacketFlag, Question, ResourceRecord, CLASS, QCLASS, QTYPE, RCODE, TYPE,
};
use tokio::net::UdpSocket;

use super::{
    category_client::{CategoryError, CategoryList, CategoryLookup},
    dns_packets::ParsedPacket,
    upstream::{UpstreamError, UpstreamExchange},
};

/// Raw A/IN query with recursion desired.
pub fn example_query(id: u16, name: &str) -> Vec<u8> {
    let mut query = Packet::new_query(id);
    query.questions.push(Question::new(
        Name::new(name).unwrap(),
        QTYPE::TYPE(TYPE::A),
        QCLASS::CLASS(CLASS::IN),
        false,
    ));
    query.set_flags(PacketFlag::RECURSION_DESIRED);
    query.build_bytes_vec().unwrap()
}

#[derive(Debug, Clone, Copy)]
pub enum UpstreamBehaviour {
    /// NOERROR with one A record.
    Answer { ttl: u32 },
    /// Empty reply with the given rcode.
    Rcode(RCODE),
    /// Never replies.
    Silent,
    /// Replies with a wrong id first, then correctly.
    WrongIdThenAnswer,
}

/// Builds the reply for `query` with the id set to `id`.
fn build_reply(query: &[u8], id: u16, behaviour: UpstreamBehaviour) -> Vec<u8> {
    let query = Packet::parse(query).unwrap();
    let question = query.questions[0].clone();
    let mut reply = Packet::new_reply(id);
    reply.set_flags(PacketFlag::RECURSION_AVAILABLE);
    match behaviour {
        UpstreamBehaviour::Rcode(rcode) => {
            *reply.rcode_mut() = rcode;
        }
        UpstreamBehaviour::Answer { ttl } => {
            reply.answers.push(ResourceRecord::new(
                question.qname.clone(),
                CLASS::IN,
                ttl,
                RData::A(A {
                    address: u32::from(std::net::Ipv4Addr::new(93, 184, 216, 34)),
                }),
            ));
        }
        UpstreamBehaviour::WrongIdThenAnswer => {
            reply.answers.push(ResourceRecord::new(
                question.qname.clone(),
                CLASS::IN,
                300,
                RData::A(A { address: 1 }),
            ));
        }
        UpstreamBehaviour::Silent => {}
    }
    reply.questions.push(question);
    reply.build_bytes_vec().unwrap()
}

/// UDP resolver on 127.0.0.1 that records every query it gets.
#[derive(Debug)]
pub struct MockUpstream {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockUpstream {
    pub async fn start(behaviour: UpstreamBehaviour) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(vec![]));
        let store = received.clone();
        tokio::spawn(async move {
            let mut buffer = [0; 4096];
            loop {
                let Ok((size, from)) = socket.recv_from(&mut buffer).await else {
                    break;
                };
                let query = buffer[..size].to_vec();
                store.lock().unwrap().push(query.clone());
                let id = u16::from_be_bytes([query[0], query[1]]);
                match behaviour {
                    UpstreamBehaviour::Silent => {}
                    UpstreamBehaviour::WrongIdThenAnswer => {
                        let wrong = build_reply(&query, id.wrapping_add(1), behaviour);
                        let _ = socket.send_to(&wrong, from).await;
                        let right = build_reply(&query, id, behaviour);
                        let _ = socket.send_to(&right, from).await;
                    }
                    _ => {
                        let reply = build_reply(&query, id, behaviour);
                        let _ = socket.send_to(&reply, from).await;
                    }
                }
            }
        });
        Self { addr, received }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

/// Upstream without any networking.
#[derive(Debug, Clone)]
pub struct FakeUpstream {
    behaviour: UpstreamBehaviour,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeUpstream {
    pub fn new(behaviour: UpstreamBehaviour) -> Self {
        Self {
            behaviour,
            received: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamExchange for FakeUpstream {
    async fn exchange(&self, query: &[u8]) -> Result<ParsedPacket, UpstreamError> {
        self.received.lock().unwrap().push(query.to_vec());
        if let UpstreamBehaviour::Silent = self.behaviour {
            return Err(UpstreamError::ReadTimeout);
        }
        let id = Packet::parse(query)?.id();
        Ok(ParsedPacket::new(build_reply(query, id, self.behaviour))?)
    }
}

/// Category lookup with a fixed answer. Records every client it is asked about.
#[derive(Debug, Clone)]
pub struct FakeCategories {
    categories: Option<Vec<i64>>,
    clients: Arc<Mutex<Vec<IpAddr>>>,
}

impl FakeCategories {
    pub fn found(categories: Vec<i64>) -> Self {
        Self {
            categories: Some(categories),
            clients: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn failing() -> Self {
        Self {
            categories: None,
            clients: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn calls(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn clients(&self) -> Vec<IpAddr> {
        self.clients.lock().unwrap().clone()
    }
}

#[async_trait]
impl CategoryLookup for FakeCategories {
    async fn resolve(&self, client: IpAddr) -> Result<CategoryList, CategoryError> {
        self.clients.lock().unwrap().push(client);
        match &self.categories {
            Some(categories) => Ok(CategoryList::new(categories.clone())),
            None => Err(CategoryError::Timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CategoryServiceBehaviour {
    Categories(Vec<i64>),
    Status(u16),
    Body(&'static str),
    Delay(Duration),
}

async fn category_response(behaviour: &CategoryServiceBehaviour) -> Response {
    match behaviour {
        CategoryServiceBehaviour::Categories(categories) => Json(CategoryList::new(categories.clone())).into_response(),
        CategoryServiceBehaviour::Status(code) => StatusCode::from_u16(*code).unwrap().into_response(),
        CategoryServiceBehaviour::Body(body) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], *body).into_response()
        }
        CategoryServiceBehaviour::Delay(delay) => {
            tokio::time::sleep(*delay).await;
            Json(CategoryList::default()).into_response()
        }
    }
}

/// Starts an HTTP category service on 127.0.0.1. Returns the base url.
pub async fn spawn_category_service(behaviour: CategoryServiceBehaviour) -> String {
    let behaviour = Arc::new(behaviour);
    let app = Router::new().route(
        "/categories/:ip",
        get(move |Path(_ip): Path<String>| {
            let behaviour = behaviour.clone();
            async move { category_response(&behaviour).await }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/categories")
}
