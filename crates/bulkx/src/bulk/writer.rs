//! ✍️ NDJSON bulk body writer.
//!
//! One action line, then (maybe) one document line, per operation. Every line ends in `\n`,
//! including the last one, because the `_bulk` API treats a missing trailing newline as a
//! personal insult.
//!
//! Documents go through [`SerializedDocument::write_to`], so raw documents are copied
//! byte-for-byte and structured ones are walked by serde_json. The action line is the only
//! thing we ever serialize ourselves.

use std::io::{self, Write};

use serde::Serialize;

use crate::documents::{BulkAction, BulkOperation, SerializedDocument};

#[derive(Serialize)]
struct ActionMetadata<'a> {
    #[serde(rename = "_index", skip_serializing_if = "Option::is_none")]
    index: Option<&'a str>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<&'a str>,
}

// -- externally tagged: serializes as {"index":{...}}
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum ActionLine<'a> {
    Index(ActionMetadata<'a>),
    Create(ActionMetadata<'a>),
    Update(ActionMetadata<'a>),
    Delete(ActionMetadata<'a>),
}

impl<'a> ActionLine<'a> {
    fn for_operation(operation: &'a BulkOperation) -> Self {
        let carries_pipeline = matches!(operation.action(), BulkAction::Index | BulkAction::Create);
        let metadata = ActionMetadata {
            index: operation.index_name(),
            id: operation.id(),
            routing: operation.routing(),
            // -- update/delete don't take a pipeline on the wire, so it stays home
            pipeline: operation.pipeline().filter(|_| carries_pipeline),
        };
        match operation.action() {
            BulkAction::Index => ActionLine::Index(metadata),
            BulkAction::Create => ActionLine::Create(metadata),
            BulkAction::Update | BulkAction::Upsert => ActionLine::Update(metadata),
            BulkAction::Delete => ActionLine::Delete(metadata),
        }
    }
}

/// 📜 Write the full NDJSON body for `operations`, in order.
pub(crate) fn write_bulk_body<W: Write>(writer: &mut W, operations: &[BulkOperation]) -> io::Result<()> {
    for operation in operations {
        write_operation(writer, operation)?;
    }
    Ok(())
}

/// ✍️ One operation: action line plus its document line, if it has one.
pub(crate) fn write_operation<W: Write>(writer: &mut W, operation: &BulkOperation) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, &ActionLine::for_operation(operation))?;
    writer.write_all(b"\n")?;

    let Some(document) = operation.document() else {
        return Ok(());
    };
    match operation.action() {
        BulkAction::Index | BulkAction::Create => document.write_to(writer)?,
        BulkAction::Update => {
            writer.write_all(b"{\"doc\":")?;
            document.write_to(writer)?;
            writer.write_all(b"}")?;
        }
        BulkAction::Upsert => {
            writer.write_all(b"{\"doc\":")?;
            document.write_to(writer)?;
            writer.write_all(b",\"upsert\":")?;
            document.write_to(writer)?;
            writer.write_all(b"}")?;
        }
        // -- unreachable in practice: BulkOperation::new refuses deletes with documents
        BulkAction::Delete => return Ok(()),
    }
    writer.write_all(b"\n")
}

/// 🫁 Present documents as one JSON array. This is what the compressed estimator squeezes.
///
/// Documentless operations are skipped entirely; the estimator charges them a flat fee.
pub(crate) fn write_document_array<W: Write>(writer: &mut W, operations: &[BulkOperation]) -> io::Result<()> {
    writer.write_all(b"[")?;
    let documents = operations.iter().filter_map(BulkOperation::document);
    for (position, document) in documents.enumerate() {
        if position > 0 {
            writer.write_all(b",")?;
        }
        SerializedDocument::write_to(document, writer)?;
    }
    writer.write_all(b"]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    fn render(operations: &[BulkOperation]) -> Result<String> {
        let mut body = Vec::new();
        write_bulk_body(&mut body, operations)?;
        Ok(String::from_utf8(body)?)
    }

    #[test]
    fn the_one_where_every_action_speaks_ndjson() -> Result<()> {
        let doc = || SerializedDocument::from_raw(r#"{"n":1}"#);
        let operations = vec![
            BulkOperation::index(doc()?).with_index("i").with_id("1").with_pipeline("p"),
            BulkOperation::create(doc()?).with_index("i").with_routing("r"),
            BulkOperation::update(doc()?).with_index("i").with_id("2").with_pipeline("p"),
            BulkOperation::upsert(doc()?).with_index("i").with_id("3"),
            BulkOperation::delete().with_index("i").with_id("4"),
        ];
        let expected = concat!(
            "{\"index\":{\"_index\":\"i\",\"_id\":\"1\",\"pipeline\":\"p\"}}\n{\"n\":1}\n",
            "{\"create\":{\"_index\":\"i\",\"routing\":\"r\"}}\n{\"n\":1}\n",
            "{\"update\":{\"_index\":\"i\",\"_id\":\"2\"}}\n{\"doc\":{\"n\":1}}\n",
            "{\"update\":{\"_index\":\"i\",\"_id\":\"3\"}}\n{\"doc\":{\"n\":1},\"upsert\":{\"n\":1}}\n",
            "{\"delete\":{\"_index\":\"i\",\"_id\":\"4\"}}\n",
        );
        assert_eq!(render(&operations)?, expected);
        Ok(())
    }

    #[test]
    fn the_one_where_raw_bytes_pass_through_untouched() -> Result<()> {
        // 🧪 odd spacing and key order survive; a re-serialize would have normalized them
        let raw = r#"{ "z" : 1,   "a":[ 1,2 ] }"#;
        let operations = vec![BulkOperation::index(SerializedDocument::from_raw(raw)?)];
        assert_eq!(render(&operations)?, format!("{{\"index\":{{}}}}\n{raw}\n"));
        Ok(())
    }

    #[test]
    fn the_one_where_structured_documents_get_serialized_on_the_way_out() -> Result<()> {
        let operations = vec![BulkOperation::index(SerializedDocument::structured(
            json!({"k": "v"}),
        ))];
        assert_eq!(render(&operations)?, "{\"index\":{}}\n{\"k\":\"v\"}\n");
        Ok(())
    }

    #[test]
    fn the_one_where_the_sample_array_skips_deletes() -> Result<()> {
        let operations = vec![
            BulkOperation::index(SerializedDocument::from_raw("1")?),
            BulkOperation::delete().with_id("x"),
            BulkOperation::index(SerializedDocument::from_raw("2")?),
        ];
        let mut out = Vec::new();
        write_document_array(&mut out, &operations)?;
        assert_eq!(out, b"[1,2]");
        Ok(())
    }
}
