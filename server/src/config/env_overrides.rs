//! Environment variable layer on top of the config file.

use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use super::ConfigToml;

pub const LISTEN_ADDR_VAR: &str = "DNS_LISTEN_ADDR";
pub const PORT_VAR: &str = "DNS_PORT";
pub const UPSTREAM_VAR: &str = "DNS_UPSTREAM";
pub const CACHE_SIZE_VAR: &str = "DNS_CACHE_SIZE";
pub const REST_URL_VAR: &str = "DNS_REST_URL";
pub const DEFAULT_TTL_VAR: &str = "DNS_DEFAULT_TTL";
pub const METRICS_PORT_VAR: &str = "DNS_METRICS_PORT";

/// Parses the variable. Unset or empty values yield `None`, invalid ones are logged and yield `None` too.
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Invalid value {value:?} for {key}. Keep the previous value.");
            None
        }
    }
}

impl ConfigToml {
    /// Overrides values with the `DNS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overrides values with whatever `lookup` returns for the `DNS_*` keys.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = parse_var::<IpAddr>(&lookup, LISTEN_ADDR_VAR) {
            // The metrics endpoint shares the listen address.
            self.general.socket.set_ip(ip);
            self.metrics.socket.set_ip(ip);
        }
        if let Some(port) = parse_var::<u16>(&lookup, PORT_VAR) {
            self.general.socket.set_port(port);
        }
        if let Some(forward) = parse_var::<SocketAddr>(&lookup, UPSTREAM_VAR) {
            self.upstream.forward = forward;
        }
        match parse_var::<usize>(&lookup, CACHE_SIZE_VAR) {
            Some(0) => tracing::warn!("{CACHE_SIZE_VAR} must be greater than 0. Keep {}.", self.cache.size),
            Some(size) => self.cache.size = size,
            None => {}
        }
        if let Some(url) = parse_var::<String>(&lookup, REST_URL_VAR) {
            self.categories.url = url;
        }
        if let Some(ttl) = parse_var::<u32>(&lookup, DEFAULT_TTL_VAR) {
            self.cache.default_ttl = ttl;
        }
        if let Some(port) = parse_var::<u16>(&lookup, METRICS_PORT_VAR) {
            self.metrics.socket.set_port(port);
        }
    }
}
