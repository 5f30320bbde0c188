use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use tracing::trace;

use crate::api_wrappers::ApiWrapper;
use crate::bulk::BulkRequest;
use crate::error::BulkError;
use crate::response::BulkResponse;
use crate::transport::{Transport, TransportBackend, parse_bulk_response};

/// 🏚️ For clusters from the typed-index era: `POST /{index}/_doc/_bulk`.
///
/// The index comes from the request, else from the first operation, else nowhere, and
/// nowhere is a contract error. We do not scan past the first operation and we do not
/// invent a placeholder. A batch that starts with an index-less delete fails fast.
#[derive(Debug)]
pub struct LegacyApiWrapper {
    transport: Arc<TransportBackend>,
}

impl LegacyApiWrapper {
    pub fn new(transport: Arc<TransportBackend>) -> Self {
        Self { transport }
    }

    /// 🛣️ The typed bulk path for `request`.
    pub fn path_for(request: &BulkRequest) -> Result<String> {
        let index = request.resolve_index().ok_or_else(|| {
            BulkError::contract(
                "no index on the request or its first operation; the legacy bulk endpoint needs one in the path",
            )
        })?;
        Ok(format!("/{index}/_doc/_bulk"))
    }
}

#[async_trait]
impl ApiWrapper for LegacyApiWrapper {
    async fn execute(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let path = Self::path_for(request)?;
        let params = request.params().query_pairs();
        trace!("🏚️ Legacy bulk → POST {} with {} params", path, params.len());
        let raw = self
            .transport
            .perform(Method::POST, &path, &params, Some(request.body()))
            .await
            .context("💀 Legacy typed bulk call failed")?;
        parse_bulk_response(&raw)
    }
}
