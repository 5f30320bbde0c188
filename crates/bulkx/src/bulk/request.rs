//! 🔒 The sealed side of the accumulator lifecycle.
//!
//! An open accumulator is single-writer and mutable. Calling `seal()` on it consumes it and
//! hands back a [`SealedBulkRequest`]: read-only, shareable, and able to build its wire body
//! exactly once. There is no "please don't add after building" comment anywhere, because
//! there is no `add_operation` on this type to call. The borrow checker is the comment.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::trace;

use crate::bulk::writer;
use crate::documents::BulkOperation;

/// 🔄 The `refresh` query parameter. `WaitFor` is the polite one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refresh {
    True,
    False,
    WaitFor,
}

impl Refresh {
    pub fn as_str(self) -> &'static str {
        match self {
            Refresh::True => "true",
            Refresh::False => "false",
            Refresh::WaitFor => "wait_for",
        }
    }
}

/// 🧾 Request-level parameters. Every field is optional; unset means "don't send it".
///
/// Shared by every request a sink builds, so it travels behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkRequestParams {
    /// Default index for operations that don't name one.
    pub index: Option<String>,
    pub pipeline: Option<String>,
    pub routing: Option<String>,
    pub require_alias: Option<bool>,
    pub refresh: Option<Refresh>,
    pub wait_for_active_shards: Option<String>,
    pub timeout: Option<String>,
    pub source: Option<Vec<String>>,
    pub source_excludes: Option<Vec<String>>,
    pub source_includes: Option<Vec<String>>,
}

impl BulkRequestParams {
    /// 🔗 Query pairs for every parameter that is set, in a stable order. Lists are comma-joined.
    ///
    /// The index is not a query parameter; wrappers put it in the path when they need it.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(pipeline) = &self.pipeline {
            pairs.push(("pipeline", pipeline.clone()));
        }
        if let Some(routing) = &self.routing {
            pairs.push(("routing", routing.clone()));
        }
        if let Some(require_alias) = self.require_alias {
            pairs.push(("require_alias", require_alias.to_string()));
        }
        if let Some(refresh) = self.refresh {
            pairs.push(("refresh", refresh.as_str().to_string()));
        }
        if let Some(shards) = &self.wait_for_active_shards {
            pairs.push(("wait_for_active_shards", shards.clone()));
        }
        if let Some(source) = &self.source {
            pairs.push(("_source", source.join(",")));
        }
        if let Some(excludes) = &self.source_excludes {
            pairs.push(("_source_excludes", excludes.join(",")));
        }
        if let Some(includes) = &self.source_includes {
            pairs.push(("_source_includes", includes.join(",")));
        }
        if let Some(timeout) = &self.timeout {
            pairs.push(("timeout", timeout.clone()));
        }
        pairs
    }
}

/// 📜 A materialized bulk request: NDJSON body plus the operations and params it came from.
#[derive(Debug)]
pub struct BulkRequest {
    params: Arc<BulkRequestParams>,
    operations: Arc<[BulkOperation]>,
    body: Vec<u8>,
}

impl BulkRequest {
    fn build(params: Arc<BulkRequestParams>, operations: Arc<[BulkOperation]>) -> Result<Self> {
        let mut body = Vec::new();
        writer::write_bulk_body(&mut body, &operations)
            .context("💀 Failed to render the NDJSON bulk body. One of the documents refused to be written down.")?;
        trace!(
            "📜 Built bulk body: {} operations, {} bytes",
            operations.len(),
            body.len()
        );
        Ok(Self {
            params,
            operations,
            body,
        })
    }

    pub fn params(&self) -> &BulkRequestParams {
        &self.params
    }

    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    /// 📦 The NDJSON body, trailing newline included.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 🎯 Request-level index, falling back to the first operation's index. Nothing else.
    ///
    /// Later operations are never scanned. If the first one has no index, there is no answer.
    pub fn resolve_index(&self) -> Option<&str> {
        self.params
            .index
            .as_deref()
            .or_else(|| self.operations.first().and_then(BulkOperation::index_name))
    }
}

/// 🔒 A batch that will never grow again. Builds its [`BulkRequest`] once, on first ask.
#[derive(Debug)]
pub struct SealedBulkRequest {
    params: Arc<BulkRequestParams>,
    operations: Arc<[BulkOperation]>,
    estimated_size_bytes: u64,
    built: OnceLock<BulkRequest>,
}

impl SealedBulkRequest {
    pub(crate) fn new(
        params: Arc<BulkRequestParams>,
        operations: Vec<BulkOperation>,
        estimated_size_bytes: u64,
    ) -> Self {
        Self {
            params,
            operations: Arc::from(operations),
            estimated_size_bytes,
            built: OnceLock::new(),
        }
    }

    /// 📜 The wire request. First call builds it; every later call returns the same value.
    pub fn request(&self) -> Result<&BulkRequest> {
        if let Some(built) = self.built.get() {
            return Ok(built);
        }
        let built = BulkRequest::build(Arc::clone(&self.params), Arc::clone(&self.operations))?;
        Ok(self.built.get_or_init(|| built))
    }

    pub fn params(&self) -> &BulkRequestParams {
        &self.params
    }

    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    pub fn operations_count(&self) -> usize {
        self.operations.len()
    }

    /// 📏 The accumulator's final estimate at the moment it was sealed.
    pub fn estimated_size_bytes(&self) -> u64 {
        self.estimated_size_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::SerializedDocument;

    fn sealed(params: BulkRequestParams, operations: Vec<BulkOperation>) -> SealedBulkRequest {
        SealedBulkRequest::new(Arc::new(params), operations, 0)
    }

    #[test]
    fn the_one_where_the_request_is_built_once_and_handed_out_forever() -> Result<()> {
        let op = BulkOperation::index(SerializedDocument::from_raw(r#"{"a":1}"#)?)
            .with_index("orders");
        let sealed = sealed(BulkRequestParams::default(), vec![op]);

        let first = sealed.request()?;
        let second = sealed.request()?;
        // 🧪 same address, not merely equal bytes
        assert!(std::ptr::eq(first, second));
        assert_eq!(
            std::str::from_utf8(first.body())?,
            "{\"index\":{\"_index\":\"orders\"}}\n{\"a\":1}\n"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_the_request_index_beats_the_operation_index() -> Result<()> {
        let op = BulkOperation::delete().with_index("orders").with_id("1");
        let params = BulkRequestParams {
            index: Some("logs".into()),
            ..Default::default()
        };
        let sealed = sealed(params, vec![op]);
        assert_eq!(sealed.request()?.resolve_index(), Some("logs"));
        Ok(())
    }

    #[test]
    fn the_one_where_only_the_first_operation_is_asked_for_an_index() -> Result<()> {
        let first = BulkOperation::delete().with_id("1");
        let second = BulkOperation::delete().with_index("orders").with_id("2");
        let sealed = sealed(BulkRequestParams::default(), vec![first, second]);
        assert_eq!(sealed.request()?.resolve_index(), None);
        Ok(())
    }

    #[test]
    fn the_one_where_only_set_params_become_query_pairs() {
        let params = BulkRequestParams {
            index: Some("ignored-here".into()),
            pipeline: Some("p1".into()),
            refresh: Some(Refresh::WaitFor),
            source_includes: Some(vec!["a".into(), "b".into()]),
            ..Default::default()
        };
        assert_eq!(
            params.query_pairs(),
            vec![
                ("pipeline", "p1".to_string()),
                ("refresh", "wait_for".to_string()),
                ("_source_includes", "a,b".to_string()),
            ]
        );
        assert!(BulkRequestParams::default().query_pairs().is_empty());
    }
}
