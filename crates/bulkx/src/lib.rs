//! 📦 bulkx — pack documents into `_bulk` requests, weigh them, ship them, count the bodies.
//!
//! 🧠 Knowledge graph, top to bottom:
//! - [`documents`]: the operation model and the record → operation encoder
//! - [`bulk`]: accumulators (plain and compressed-size estimating), sealing, the NDJSON body
//! - [`dispatch`]: bounded concurrency for sealed requests
//! - [`api_wrappers`]: which endpoint the body goes to
//! - [`transport`]: how the bytes get there (HTTP, or an in-memory tape)
//! - [`response`] + [`metrics`]: what came back, tallied
//! - [`sink`]: the per-worker loop that ties the above together
//! - [`source`] and the private supervisors: the file-to-store pipeline behind [`run`]

use anyhow::{Context, Result};

pub mod api_wrappers;
pub mod app_config;
pub mod bulk;
pub mod dispatch;
pub mod documents;
pub mod error;
pub mod metrics;
pub mod response;
pub mod sink;
pub mod source;
mod supervisors;
pub mod transport;

pub use app_config::{AppConfig, load_config};
pub use bulk::{
    AccumulatorBackend, AccumulatorFactory, BulkAccumulator, BulkRequest, BulkRequestParams,
    EstimationStrategy, SealedBulkRequest,
};
pub use dispatch::{Dispatcher, DispatcherBackend};
pub use documents::{BulkAction, BulkOperation, DocumentEncoder, SerializedDocument};
pub use error::BulkError;
pub use sink::BulkSink;
pub use supervisors::RunSummary;
pub use transport::{HttpTransport, InMemoryTransport, TransportBackend};

use crate::supervisors::Supervisor;

/// 🚀 Read the configured NDJSON file and bulk it into the configured cluster.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    let transport = HttpTransport::new(app_config.connection.clone())
        .context("💀 Could not build the HTTP transport from [connection]")?;
    run_with_transport(app_config, TransportBackend::Http(transport)).await
}

/// 🧪 Same pipeline, caller's choice of transport. `InMemory` makes it a dry run.
pub async fn run_with_transport(app_config: AppConfig, transport: TransportBackend) -> Result<RunSummary> {
    Supervisor::new(app_config, transport)
        .run()
        .await
        .context("💀 bulkx run failed")
}
