//! 📦 Documents — the building blocks of every bulk request.
//!
//! 🎬 COLD OPEN — INT. LOADING DOCK — 3:47 AM
//!
//! A pallet arrives. On it: one JSON document, one verb ("index", usually), and a shipping
//! label that may or may not say where it's going. Nobody on the dock opens the box. Nobody
//! re-packs it. The box was packed at the source and it ships exactly as it arrived.
//!
//! This module defines that pallet ([`BulkOperation`]) and the box ([`SerializedDocument`]),
//! plus the [`DocumentEncoder`] that turns one raw record line into a ready-to-ship operation.
//!
//! 🧠 Knowledge graph:
//! - `SerializedDocument::Raw` → bytes go to the wire untouched (zero re-encoding)
//! - `SerializedDocument::Structured` → walked by serde_json at write time
//! - `BulkOperation` → immutable once built; its byte size is computed once, then remembered
//! - consumed by: `bulk` (accumulators + body writer), `response` (failure strings)
//!
//! 🦆

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::BulkError;

// ============================================================
// 🎬 BulkAction — the verb on the shipping label
// ============================================================

/// 🎬 What the store should do with the document.
///
/// `Upsert` is an `update` on the wire that also carries the document as its upsert body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    #[default]
    Index,
    Create,
    Update,
    Upsert,
    Delete,
}

impl BulkAction {
    /// 📛 The action key as the `_bulk` API spells it. Upsert moonlights as `update`.
    pub fn wire_name(self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
            BulkAction::Update | BulkAction::Upsert => "update",
            BulkAction::Delete => "delete",
        }
    }

    /// 📄 Does this action ship a document line? Delete travels light.
    pub fn carries_document(self) -> bool {
        !matches!(self, BulkAction::Delete)
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -- upsert gets its own name in logs even though the wire calls it update
        let name = match self {
            BulkAction::Upsert => "upsert",
            other => other.wire_name(),
        };
        f.write_str(name)
    }
}

// ============================================================
// 📦 SerializedDocument — the box, packed at the source
// ============================================================

/// 📦 A document body, in one of two shapes chosen when the document is built.
///
/// - `Raw`: already-serialized JSON, validated once and then written byte-for-byte.
///   This is the hot path. Sources hand us their original bytes and we don't touch them.
/// - `Structured`: a `serde_json::Value` tree, serialized through serde_json on write.
///
/// There is no third option and no runtime "is this pre-serialized?" sniffing. The enum IS
/// the answer. What's the DEAL with instanceof checks? We don't have them. We have match.
#[derive(Debug, Clone)]
pub enum SerializedDocument {
    Raw(Box<RawValue>),
    Structured(serde_json::Value),
}

impl SerializedDocument {
    /// 🔒 Wrap pre-serialized JSON. Validates it is one well-formed JSON value, once, here.
    ///
    /// Invalid JSON is a caller contract violation, not something to shrug at later when
    /// the store returns a 400 for the entire batch.
    pub fn from_raw(json: impl Into<String>) -> Result<Self> {
        let raw = RawValue::from_string(json.into()).map_err(|e| {
            BulkError::contract(format!(
                "document claimed to be pre-serialized JSON but does not parse: {e}"
            ))
        })?;
        Ok(Self::Raw(raw))
    }

    /// 🌳 Wrap a structured value; it gets serialized when the body is written.
    pub fn structured(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }

    /// ✍️ Write the document's JSON bytes into `writer`.
    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            SerializedDocument::Raw(raw) => writer.write_all(raw.get().as_bytes()),
            SerializedDocument::Structured(value) => {
                serde_json::to_writer(&mut *writer, value).map_err(io::Error::from)
            }
        }
    }

    /// 📏 Serialized byte length. Raw is free; structured is measured without allocating.
    fn serialized_len(&self) -> io::Result<usize> {
        match self {
            SerializedDocument::Raw(raw) => Ok(raw.get().len()),
            SerializedDocument::Structured(_) => {
                let mut counter = ByteCounter::default();
                self.write_to(&mut counter)?;
                Ok(counter.0)
            }
        }
    }

    /// 🖨️ The document as a string, for failure messages. Structured docs get serialized.
    pub fn to_json_string(&self) -> String {
        match self {
            SerializedDocument::Raw(raw) => raw.get().to_string(),
            SerializedDocument::Structured(value) => value.to_string(),
        }
    }
}

/// 🧮 An `io::Write` that counts and forgets. Like a bouncer with a clicker.
#[derive(Debug, Default)]
pub(crate) struct ByteCounter(pub(crate) usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================
// 🎯 BulkOperation — one verb, one box, one label
// ============================================================

/// 🎯 One bulk action: the atomic unit of every `_bulk` request.
///
/// Immutable after construction. The only interior state is the memoized document size,
/// which is computed on first read and then never changes. Like a birth weight.
#[derive(Debug, Clone)]
pub struct BulkOperation {
    action: BulkAction,
    index: Option<String>,
    id: Option<String>,
    routing: Option<String>,
    pipeline: Option<String>,
    document: Option<SerializedDocument>,
    document_size_bytes: OnceLock<usize>,
}

impl BulkOperation {
    /// 🏗️ Build an operation from a dynamic action.
    ///
    /// 💀 Fails if a document-carrying action has no document, or a delete brought one.
    /// Both are caller bugs. We'd rather hear about them here than from the cluster.
    pub fn new(action: BulkAction, document: Option<SerializedDocument>) -> Result<Self> {
        match (action.carries_document(), document.is_some()) {
            (true, false) => Err(BulkError::contract(format!(
                "a '{action}' operation needs a document and none was provided"
            ))
            .into()),
            (false, true) => Err(BulkError::contract(
                "a 'delete' operation must not carry a document",
            )
            .into()),
            _ => Ok(Self::bare(action, document)),
        }
    }

    fn bare(action: BulkAction, document: Option<SerializedDocument>) -> Self {
        Self {
            action,
            index: None,
            id: None,
            routing: None,
            pipeline: None,
            document,
            document_size_bytes: OnceLock::new(),
        }
    }

    /// 📥 `index`: create or overwrite.
    pub fn index(document: SerializedDocument) -> Self {
        Self::bare(BulkAction::Index, Some(document))
    }

    /// 🆕 `create`: fail if the id already exists.
    pub fn create(document: SerializedDocument) -> Self {
        Self::bare(BulkAction::Create, Some(document))
    }

    /// 🩹 `update`: partial document merge.
    pub fn update(document: SerializedDocument) -> Self {
        Self::bare(BulkAction::Update, Some(document))
    }

    /// 🩹➕ `upsert`: update, or insert the same document if missing.
    pub fn upsert(document: SerializedDocument) -> Self {
        Self::bare(BulkAction::Upsert, Some(document))
    }

    /// 🗑️ `delete`: no document, just an address.
    pub fn delete() -> Self {
        Self::bare(BulkAction::Delete, None)
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn action(&self) -> BulkAction {
        self.action
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn routing(&self) -> Option<&str> {
        self.routing.as_deref()
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn document(&self) -> Option<&SerializedDocument> {
        self.document.as_ref()
    }

    /// 📏 Serialized document length in bytes, computed once and remembered forever.
    ///
    /// Deletes weigh 0. The per-operation envelope is the accumulator's problem, not ours.
    pub fn document_size_bytes(&self) -> Result<usize> {
        if let Some(size) = self.document_size_bytes.get() {
            return Ok(*size);
        }
        let measured = match &self.document {
            Some(document) => document
                .serialized_len()
                .context("💀 Could not measure a structured document. serde_json looked at it and flinched.")?,
            None => 0,
        };
        // -- if two readers race, both measured the same immutable bytes; first write wins
        Ok(*self.document_size_bytes.get_or_init(|| measured))
    }
}

// ============================================================
// 🏭 DocumentEncoder — raw record line → BulkOperation
// ============================================================

/// 🔧 Knobs for turning records into operations. Lives in `index` config.
#[derive(Debug, Clone, Default)]
pub struct EncoderConfig {
    pub action: BulkAction,
    pub index: Option<String>,
    pub document_id_field: Option<String>,
    pub routing_field: Option<String>,
    pub pipeline: Option<String>,
}

/// 🏭 The Document Encoder: one JSON record in, one [`BulkOperation`] out.
///
/// The record's original bytes become the document as-is (`SerializedDocument::Raw`).
/// We only peek at the top-level fields we were told to lift into `_id` and `routing`,
/// and we borrow those as raw slices instead of building a whole `Value` tree.
#[derive(Debug, Clone)]
pub struct DocumentEncoder {
    config: EncoderConfig,
}

impl DocumentEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// 🔄 Encode one record line into an operation.
    pub fn encode(&self, record: &str) -> Result<BulkOperation> {
        let needs_fields =
            self.config.document_id_field.is_some() || self.config.routing_field.is_some();

        let (id, routing) = if needs_fields {
            // -- borrow values as raw slices; keys are owned because escapes exist
            let fields: BTreeMap<String, &RawValue> = serde_json::from_str(record)
                .context("💀 Record is not a JSON object, so we can't pluck an id or routing key out of it.")?;
            (
                self.lift_field(&fields, self.config.document_id_field.as_deref())?,
                self.lift_field(&fields, self.config.routing_field.as_deref())?,
            )
        } else {
            (None, None)
        };

        let document = if self.config.action.carries_document() {
            Some(SerializedDocument::from_raw(record.to_owned())?)
        } else {
            None
        };

        let mut operation = BulkOperation::new(self.config.action, document)?;
        if let Some(index) = &self.config.index {
            operation = operation.with_index(index.clone());
        }
        if let Some(id) = id {
            operation = operation.with_id(id);
        }
        if let Some(routing) = routing {
            operation = operation.with_routing(routing);
        }
        if let Some(pipeline) = &self.config.pipeline {
            operation = operation.with_pipeline(pipeline.clone());
        }
        Ok(operation)
    }

    fn lift_field(
        &self,
        fields: &BTreeMap<String, &RawValue>,
        field: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(field) = field else {
            return Ok(None);
        };
        match fields.get(field) {
            None => Ok(None),
            Some(raw) => {
                let text = raw.get();
                if text.starts_with('"') {
                    let unquoted: String = serde_json::from_str(text)
                        .context(format!("💀 Field '{field}' looked like a string and then wasn't."))?;
                    Ok(Some(unquoted))
                } else if text == "null" {
                    Ok(None)
                } else {
                    // -- numbers and booleans keep their literal spelling: 42 → "42"
                    Ok(Some(text.to_string()))
                }
            }
        }
    }
}
