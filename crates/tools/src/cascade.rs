//! Client for the downstream Cascade retrieval API.
//!
//! The wire surface is four POST/GET endpoints: `/search`, `/browse`,
//! `/search/multi`, and `/bridge`. The trait exists so the tool layer can
//! run against a scripted fake in tests; the HTTP implementation parks on
//! the runtime handle because tools execute on a blocking worker thread.

use braid_domain::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;

/// Default collection searched when the caller names none.
pub const DEFAULT_COLLECTION: &str = "primary";
/// Collections fanned out to by `search_multi` by default.
pub const MULTI_COLLECTIONS: &[&str] = &["primary", "passages"];

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub collection: String,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiSearchRequest {
    pub query: String,
    pub collections: Vec<String>,
    pub top_k_per_collection: usize,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BrowseRequest {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    pub offset: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_limit: Option<usize>,
    pub include_facets: bool,
}

/// Blocking view of the retrieval API.
pub trait CascadeApi: Send + Sync {
    fn search(&self, req: &SearchRequest) -> Result<Value>;
    fn search_multi(&self, req: &MultiSearchRequest) -> Result<Value>;
    fn browse(&self, req: &BrowseRequest) -> Result<Value>;
    fn bridge(&self, query: &str) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CascadeClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    handle: Handle,
}

impl CascadeClient {
    pub fn new(base_url: &str, api_key: &str, handle: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            handle,
        })
    }

    fn post(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.post(&url).json(body);
        if !self.api_key.is_empty() {
            req = req.header("x-api-key", &self.api_key);
        }
        self.handle.block_on(async move {
            let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::Http(format!("{url}: {status}")));
            }
            resp.json().await.map_err(|e| Error::Http(e.to_string()))
        })
    }
}

impl CascadeApi for CascadeClient {
    fn search(&self, req: &SearchRequest) -> Result<Value> {
        self.post("/search", req)
    }

    fn search_multi(&self, req: &MultiSearchRequest) -> Result<Value> {
        self.post("/search/multi", req)
    }

    fn browse(&self, req: &BrowseRequest) -> Result<Value> {
        self.post("/browse", req)
    }

    fn bridge(&self, query: &str) -> Result<Value> {
        let url = format!("{}/bridge", self.base_url);
        let mut req = self.client.get(&url).query(&[("q", query)]);
        if !self.api_key.is_empty() {
            req = req.header("x-api-key", &self.api_key);
        }
        self.handle.block_on(async move {
            let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::Http(format!("{url}: {status}")));
            }
            resp.json().await.map_err(|e| Error::Http(e.to_string()))
        })
    }
}
