use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::error::BulkError;
use crate::transport::Transport;

/// 📼 One call the in-memory transport received, kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
enum ScriptedReply {
    Body(Vec<u8>),
    Store { status: u16, body: String },
    Transport(String),
}

/// 📦 A transport that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// Every call gets recorded. Replies come from a script queue if anything is queued,
/// otherwise it makes up an all-success bulk response with one item per operation in
/// the body. Clone-able because tests need to peek inside after handing it to the pipeline;
/// the `Arc`s mean every clone shares the same tape.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    calls: Arc<tokio::sync::Mutex<Vec<RecordedCall>>>,
    script: Arc<tokio::sync::Mutex<VecDeque<ScriptedReply>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📜 Queue a raw 2xx response body for the next call.
    pub async fn push_response(&self, body: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(ScriptedReply::Body(body.into().into_bytes()));
    }

    /// 🧱 Queue a whole-request rejection.
    pub async fn push_store_error(&self, status: u16, body: impl Into<String>) {
        self.script.lock().await.push_back(ScriptedReply::Store {
            status,
            body: body.into(),
        });
    }

    /// 🔌 Queue a network-style failure.
    pub async fn push_transport_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(ScriptedReply::Transport(message.into()));
    }

    /// 📼 Everything received so far, in arrival order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

/// 🎭 Fake a success for every action line in an NDJSON bulk body.
///
/// Non-delete action lines are followed by a document line, which we skip without looking
/// at it. A document that happens to be `{"index": ...}` is not our problem that way.
fn synthesize_success(body: &[u8]) -> Result<Vec<u8>> {
    let mut items = Vec::new();
    let mut lines = body.split(|b| *b == b'\n').filter(|line| !line.is_empty());
    while let Some(line) = lines.next() {
        let action_line: Map<String, Value> = serde_json::from_slice(line)
            .context("💀 In-memory transport got an action line that isn't a JSON object")?;
        let Some((action, metadata)) = action_line.into_iter().next() else {
            return Err(BulkError::contract("empty action line in bulk body").into());
        };
        if action != "delete" {
            lines.next();
        }
        let status = if action == "create" { 201 } else { 200 };
        items.push(json!({
            action: {
                "_index": metadata.get("_index").cloned().unwrap_or(Value::Null),
                "_id": metadata.get("_id").cloned().unwrap_or(Value::Null),
                "status": status,
            }
        }));
    }
    let response = json!({ "took": 0, "errors": false, "items": items });
    Ok(serde_json::to_vec(&response)?)
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn perform(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let body = body.unwrap_or_default().to_vec();
        let reply = self.script.lock().await.pop_front();
        self.calls.lock().await.push(RecordedCall {
            method,
            path: path.to_string(),
            params: params
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
            body: body.clone(),
        });

        match reply {
            Some(ScriptedReply::Body(bytes)) => Ok(bytes),
            Some(ScriptedReply::Store { status, body }) => Err(BulkError::Store { status, body }.into()),
            Some(ScriptedReply::Transport(message)) => Err(BulkError::Transport(message).into()),
            None => synthesize_success(&body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_every_operation_gets_a_fake_thumbs_up() -> Result<()> {
        let transport = InMemoryTransport::new();
        let body = concat!(
            "{\"index\":{\"_index\":\"o\",\"_id\":\"1\"}}\n{\"index\":{\"sneaky\":true}}\n",
            "{\"delete\":{\"_index\":\"o\",\"_id\":\"2\"}}\n",
            "{\"create\":{\"_index\":\"o\"}}\n{}\n",
        );
        let raw = transport
            .perform(Method::POST, "/_bulk", &[("refresh", "true".into())], Some(body.as_bytes()))
            .await?;
        let response: crate::response::BulkResponse = serde_json::from_slice(&raw)?;

        // 🧪 three operations, even though a document line looked like an action
        assert_eq!(response.items.len(), 3);
        assert_eq!(response.items[2].result().status, 201);
        assert_eq!(response.items[0].result().id.as_deref(), Some("1"));

        let calls = transport.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].param("refresh"), Some("true"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_script_takes_priority_over_improv() -> Result<()> {
        let transport = InMemoryTransport::new();
        transport.push_store_error(429, "slow down").await;
        transport.push_response(r#"{"took":9,"errors":false,"items":[]}"#).await;

        let first = transport.perform(Method::POST, "/_bulk", &[], None).await;
        assert!(matches!(
            first.as_ref().map_err(|e| e.downcast_ref::<BulkError>()),
            Err(Some(BulkError::Store { status: 429, .. }))
        ));
        let second = transport.perform(Method::POST, "/_bulk", &[], None).await?;
        assert_eq!(second, br#"{"took":9,"errors":false,"items":[]}"#);
        Ok(())
    }
}
