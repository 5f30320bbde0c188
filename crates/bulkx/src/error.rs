//! 💀 Errors — the taxonomy of disappointment.
//!
//! Everything in bulkx returns `anyhow::Result` because context chains are how we read
//! incidents at 3am. But some failures need a last name, so the caller can tell a
//! misconfigured sink from a cluster that is simply having a bad day. Those go in here,
//! and ride inside the anyhow chain until somebody `downcast_ref`s them. 🦆

use thiserror::Error;

/// 🏷️ The four flavors of "it didn't work".
///
/// - `Contract`: the caller broke a promise (no index to resolve, raw JSON that isn't JSON).
///   Fail fast, never degrade.
/// - `Estimation`: the compressed-size sample blew up. A sampling outage, NOT a zero-byte batch.
/// - `Transport`: the bytes never made it there and back (DNS, TCP, TLS, timeouts).
/// - `Store`: the store answered, and the answer was a non-2xx for the whole request.
///
/// Item-level failures are NOT in here. A partially failed bulk is a normal `BulkResponse`.
#[derive(Debug, Error)]
pub enum BulkError {
    /// 🚫 Caller contract violation.
    #[error("bulk contract violated: {0}")]
    Contract(String),

    /// 🫁 Local compression sample failed.
    #[error("compressed size estimation failed: {0}")]
    Estimation(#[source] std::io::Error),

    /// 📡 Network or I/O failure talking to the store.
    #[error("transport failure: {0}")]
    Transport(String),

    /// 🧱 Whole-request rejection from the store.
    #[error("document store rejected the bulk request with status {status}: {body}")]
    Store {
        /// HTTP status code.
        status: u16,
        /// Raw response body, for the postmortem.
        body: String,
    },
}

impl BulkError {
    /// 🔧 Shorthand for the contract variant, because `BulkError::Contract(format!(...))`
    /// gets old by the third call site.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }
}
