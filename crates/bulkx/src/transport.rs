//! 📡 Transport — the thing that actually moves bytes to the document store.
//!
//! One low-level primitive, `perform(method, path, params, body)`, plus the typed `bulk`
//! call built on top of it. The API wrappers pick which one to use: the default wrapper wants
//! the native bulk call, the legacy and detector wrappers hand-build their own paths and go
//! through `perform`.
//!
//! 🧠 Knowledge graph:
//! - trait [`Transport`] → [`HttpTransport`] (reqwest) / [`InMemoryTransport`] (tests, dry runs)
//!   → [`TransportBackend`] enum
//! - no retries in here. A failure is a failure; the sink decides what that means.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;

use crate::bulk::BulkRequest;
use crate::response::BulkResponse;

pub mod http;
pub mod in_mem;

pub use http::HttpTransport;
pub use in_mem::{InMemoryTransport, RecordedCall};

/// 📡 A connection to a document store.
///
/// # Contract 📜
/// - `perform` sends one request and returns the raw response body on 2xx.
///   Non-2xx is a `BulkError::Store`; network trouble is a `BulkError::Transport`.
/// - `bulk` posts a materialized request to `/_bulk` (or `/{index}/_bulk` when the request
///   names a default index) and parses the response. Item failures are data, not errors.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    async fn perform(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>>;

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let path = match &request.params().index {
            Some(index) => format!("/{index}/_bulk"),
            None => "/_bulk".to_string(),
        };
        let raw = self
            .perform(Method::POST, &path, &request.params().query_pairs(), Some(request.body()))
            .await?;
        parse_bulk_response(&raw)
    }
}

/// 🔍 Raw bytes → [`BulkResponse`].
pub fn parse_bulk_response(raw: &[u8]) -> Result<BulkResponse> {
    serde_json::from_slice(raw).with_context(|| {
        format!(
            "💀 The store answered 2xx but the body isn't a bulk response we understand: {}",
            crate::response::display_source(&String::from_utf8_lossy(raw))
        )
    })
}

/// 🎭 Every transport we know how to drive.
#[derive(Debug, Clone)]
pub enum TransportBackend {
    Http(HttpTransport),
    InMemory(InMemoryTransport),
}

#[async_trait]
impl Transport for TransportBackend {
    async fn perform(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        match self {
            TransportBackend::Http(transport) => transport.perform(method, path, params, body).await,
            TransportBackend::InMemory(transport) => {
                transport.perform(method, path, params, body).await
            }
        }
    }
}
