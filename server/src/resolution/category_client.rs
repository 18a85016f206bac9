use async_trait::async_trait;
use dyn_clone::DynClone;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, net::IpAddr, time::Duration};

/// Categories assigned to one client address. Order is preserved as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryList {
    pub categories: Vec<i64>,
}

impl CategoryList {
    #[cfg(test)]
    pub fn new(categories: Vec<i64>) -> Self {
        Self { categories }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CategoryError {
    #[error("Category service did not answer in time.")]
    Timeout,

    #[error("Category service returned non-OK status: {0}")]
    Status(u16),

    #[error("Failed to query category service: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Failed to parse category service response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CategoryError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(value)
        }
    }
}

/**
 * Looks up the categories of a client.
 * Must be clonable so it can be used by multiple tasks.
 */
#[async_trait]
pub trait CategoryLookup: DynClone + Debug + Send + Sync {
    async fn resolve(&self, client: IpAddr) -> Result<CategoryList, CategoryError>;
}

dyn_clone::clone_trait_object!(CategoryLookup);

/// HTTP client for the category service. Queries `{base_url}/{client_ip}`.
#[derive(Debug, Clone)]
pub struct CategoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl CategoryClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CategoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// IPv4-mapped IPv6 clients are looked up by their IPv4 address.
    pub fn url_for(&self, client: IpAddr) -> String {
        format!("{}/{}", self.base_url, client.to_canonical())
    }
}

#[async_trait]
impl CategoryLookup for CategoryClient {
    async fn resolve(&self, client: IpAddr) -> Result<CategoryList, CategoryError> {
        let url = self.url_for(client);
        tracing::trace!("Fetch categories from {url}");
        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(CategoryError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        let categories: CategoryList = serde_json::from_slice(&body)?;
        Ok(categories)
    }
}
