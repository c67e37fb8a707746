//! Client side of the paginated remote events API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One domain entity as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable external id.
    pub id: String,
    pub data: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self { id: id.into(), data }
    }
}

/// One page of results plus the cursor of the page after it, if any.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
}

/// Query parameters passed through to every page request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, throttling, 5xx: the same request may succeed later.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Bad credentials, malformed response: retrying will not help.
    #[error("fetch error: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetch the page at `cursor` (`None` for the first page).
    async fn fetch_page(
        &self,
        entity_type: &str,
        cursor: Option<&str>,
        filters: &Filters,
    ) -> Result<Page, FetchError>;
}
