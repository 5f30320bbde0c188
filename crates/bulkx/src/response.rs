//! 📬 Responses — what the store said back, and what we do about it.
//!
//! A `_bulk` call that returns 200 can still contain a thousand failed items. That's not an
//! exception, that's Tuesday. So partial failure lives here as plain data: each item gets
//! checked, failed ones are paired with the operation that caused them (by position, since
//! the store answers in request order), and the result is counted and logged.
//!
//! Version conflicts are the one failure we shrug at. Somebody else already wrote a newer
//! version of that document. Fine. Good for them.

use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::bulk::SealedBulkRequest;
use crate::documents::{BulkOperation, SerializedDocument};
use crate::metrics::SinkMetrics;

/// 📏 Sources longer than this (in characters) are described, not printed.
pub const MAX_FAILURE_SOURCE_DISPLAY_CHARS: usize = 2048;

pub const VERSION_CONFLICT_EXCEPTION_TYPE: &str = "version_conflict_engine_exception";

/// 📬 A `_bulk` response body.
///
/// Every field defaults, because `filter_path` can strip any of them (the detector endpoint
/// does exactly that) and a missing `took` is not worth failing a batch over.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkResponseItem>,
}

/// 🏷️ One item, keyed by the action that produced it: `{"index": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkResponseItem {
    Index(ItemResult),
    Create(ItemResult),
    Update(ItemResult),
    Delete(ItemResult),
}

impl BulkResponseItem {
    pub fn result(&self) -> &ItemResult {
        match self {
            BulkResponseItem::Index(result)
            | BulkResponseItem::Create(result)
            | BulkResponseItem::Update(result)
            | BulkResponseItem::Delete(result) => result,
        }
    }

    /// ❌ `status >= 300` or an error object. Either one is enough.
    pub fn is_in_error(&self) -> bool {
        let result = self.result();
        result.status >= 300 || result.error.is_some()
    }

    pub fn is_version_conflict(&self) -> bool {
        self.result()
            .error
            .as_ref()
            .is_some_and(|error| error.kind == VERSION_CONFLICT_EXCEPTION_TYPE)
    }

    /// 👯 A successful write that bumped an existing sequence number.
    pub fn is_duplicate(&self) -> bool {
        self.result().seq_no.is_some_and(|seq_no| seq_no > 0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemResult {
    #[serde(rename = "_index", default)]
    pub index: Option<String>,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<ItemError>,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<i64>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.kind, reason),
            None => f.write_str(&self.kind),
        }
    }
}

/// 💀 One operation that didn't make it, ready for the logs (or a DLQ, if somebody builds one).
///
/// `Display` renders `index {[<index>][<id>], source[<source>]}`.
#[derive(Debug, Clone)]
pub struct FailedBulkOperation {
    pub index: Option<String>,
    pub id: Option<String>,
    pub source: Option<String>,
    pub status: Option<u16>,
    pub reason: String,
}

impl FailedBulkOperation {
    fn from_item(operation: &BulkOperation, item: &BulkResponseItem) -> Self {
        let result = item.result();
        Self {
            index: operation
                .index_name()
                .map(str::to_string)
                .or_else(|| result.index.clone()),
            id: operation.id().map(str::to_string).or_else(|| result.id.clone()),
            source: operation.document().map(SerializedDocument::to_json_string),
            status: Some(result.status),
            reason: result
                .error
                .as_ref()
                .map(ItemError::to_string)
                .unwrap_or_else(|| format!("status {}", result.status)),
        }
    }

    fn from_failure(operation: &BulkOperation, fallback_index: Option<&str>, reason: &str) -> Self {
        Self {
            index: operation.index_name().or(fallback_index).map(str::to_string),
            id: operation.id().map(str::to_string),
            source: operation.document().map(SerializedDocument::to_json_string),
            status: None,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FailedBulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index {{[{}][{}], source[{}]}}",
            self.index.as_deref().unwrap_or_default(),
            self.id.as_deref().unwrap_or_default(),
            display_source(self.source.as_deref().unwrap_or_default())
        )
    }
}

/// ✂️ Long sources get replaced with a description of how long they were.
pub fn display_source(source: &str) -> String {
    let length = source.chars().count();
    if length > MAX_FAILURE_SOURCE_DISPLAY_CHARS {
        format!("n/a, actual length: [{length}], max length: [{MAX_FAILURE_SOURCE_DISPLAY_CHARS}]")
    } else {
        source.to_string()
    }
}

/// 🧾 Walk a response against the sealed batch it answers, count everything, collect failures.
///
/// Items and operations are paired by position. If the counts disagree we say so. Operations
/// left without an item are counted as failed; surplus items are ignored.
pub fn handle_response(
    sealed: &SealedBulkRequest,
    response: &BulkResponse,
    metrics: &SinkMetrics,
) -> Vec<FailedBulkOperation> {
    let operations = sealed.operations();
    if operations.len() != response.items.len() {
        warn!(
            "⚠️ Sent {} operations but got {} response items back. Pairing what lines up.",
            operations.len(),
            response.items.len()
        );
    }

    let mut failures = Vec::new();
    for (operation, item) in operations.iter().zip(&response.items) {
        if !item.is_in_error() {
            metrics.record_document_succeeded(item.is_duplicate());
            continue;
        }
        metrics.record_document_failed();
        if item.is_version_conflict() {
            metrics.record_version_conflict();
            debug!(
                "🤷 Version conflict on [{}][{}]: {}",
                operation.index_name().unwrap_or_default(),
                operation.id().unwrap_or_default(),
                item.result()
                    .error
                    .as_ref()
                    .and_then(|error| error.reason.as_deref())
                    .unwrap_or_default()
            );
            continue;
        }
        failures.push(FailedBulkOperation::from_item(operation, item));
    }

    // -- nobody answered for these, so nobody gets to say they made it
    let fallback_index = sealed.params().index.as_deref();
    for operation in operations.iter().skip(response.items.len()) {
        metrics.record_document_failed();
        failures.push(FailedBulkOperation::from_failure(
            operation,
            fallback_index,
            "no response item for this operation",
        ));
    }

    log_failures(&failures);
    failures
}

/// 💥 The whole request failed. Every operation in it failed with the same reason.
pub fn handle_request_failure(
    sealed: &SealedBulkRequest,
    error: &anyhow::Error,
    metrics: &SinkMetrics,
) -> Vec<FailedBulkOperation> {
    metrics.record_bulk_request_failed(sealed.operations_count() as u64);
    let reason = format!("{error:#}");
    let fallback_index = sealed.params().index.as_deref();
    let failures: Vec<_> = sealed
        .operations()
        .iter()
        .map(|operation| FailedBulkOperation::from_failure(operation, fallback_index, &reason))
        .collect();
    log_failures(&failures);
    failures
}

fn log_failures(failures: &[FailedBulkOperation]) {
    for failure in failures {
        warn!(
            "💀 Bulk operation failed: {}, status {:?}, reason: {}",
            failure, failure.status, failure.reason
        );
    }
}
