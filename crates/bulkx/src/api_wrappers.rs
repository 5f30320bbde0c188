//! 🏛️ API wrappers — one bulk body, several ways to deliver it.
//!
//! The NDJSON body is the same everywhere. What changes is *where* it goes and what comes
//! back. Wire format and execution target are two separate axes, and this module is where
//! the second one lives:
//!
//! - [`DefaultApiWrapper`]: the transport's native `_bulk` call. The happy path.
//! - [`LegacyApiWrapper`]: ES 6 era clusters want `POST /{index}/_doc/_bulk`, so we build the
//!   path and query string by hand.
//! - [`DetectorRunApiWrapper`]: same body, posted to the security analytics detector run
//!   endpoint with a `filter_path` that trims the response down to what we read.
//!
//! Chosen once per sink from config via [`ApiWrapperKind::select`]. Never per request.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::{DistributionVersion, ExecutionMode};
use crate::bulk::BulkRequest;
use crate::response::BulkResponse;
use crate::transport::TransportBackend;

pub mod default;
pub mod detector;
pub mod legacy;

pub use default::DefaultApiWrapper;
pub use detector::DetectorRunApiWrapper;
pub use legacy::LegacyApiWrapper;

/// 🎯 Executes a materialized bulk request against the store.
///
/// Fails with a transport error or a whole-request store error. Item-level failures come
/// back inside the `BulkResponse`, as data.
#[async_trait]
pub trait ApiWrapper: std::fmt::Debug + Send + Sync {
    async fn execute(&self, request: &BulkRequest) -> Result<BulkResponse>;
}

/// 🏷️ Which wrapper a sink uses. A pure function of config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiWrapperKind {
    Default,
    Legacy,
    DetectorRun,
}

impl ApiWrapperKind {
    /// 🎯 An execution-mode override beats the distribution version.
    pub fn select(version: DistributionVersion, mode: ExecutionMode) -> Self {
        match (mode, version) {
            (ExecutionMode::DetectorRun, _) => ApiWrapperKind::DetectorRun,
            (ExecutionMode::Bulk, DistributionVersion::Es6) => ApiWrapperKind::Legacy,
            (ExecutionMode::Bulk, DistributionVersion::Default) => ApiWrapperKind::Default,
        }
    }
}

/// 🎭 The wrapper family behind one type.
#[derive(Debug)]
pub enum ApiWrapperBackend {
    Default(DefaultApiWrapper),
    Legacy(LegacyApiWrapper),
    DetectorRun(DetectorRunApiWrapper),
}

impl ApiWrapperBackend {
    pub fn new(kind: ApiWrapperKind, transport: Arc<TransportBackend>) -> Self {
        match kind {
            ApiWrapperKind::Default => ApiWrapperBackend::Default(DefaultApiWrapper::new(transport)),
            ApiWrapperKind::Legacy => ApiWrapperBackend::Legacy(LegacyApiWrapper::new(transport)),
            ApiWrapperKind::DetectorRun => {
                ApiWrapperBackend::DetectorRun(DetectorRunApiWrapper::new(transport))
            }
        }
    }

    pub fn kind(&self) -> ApiWrapperKind {
        match self {
            ApiWrapperBackend::Default(_) => ApiWrapperKind::Default,
            ApiWrapperBackend::Legacy(_) => ApiWrapperKind::Legacy,
            ApiWrapperBackend::DetectorRun(_) => ApiWrapperKind::DetectorRun,
        }
    }
}

#[async_trait]
impl ApiWrapper for ApiWrapperBackend {
    async fn execute(&self, request: &BulkRequest) -> Result<BulkResponse> {
        match self {
            ApiWrapperBackend::Default(wrapper) => wrapper.execute(request).await,
            ApiWrapperBackend::Legacy(wrapper) => wrapper.execute(request).await,
            ApiWrapperBackend::DetectorRun(wrapper) => wrapper.execute(request).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_detector_mode_outranks_the_version() {
        assert_eq!(
            ApiWrapperKind::select(DistributionVersion::Es6, ExecutionMode::DetectorRun),
            ApiWrapperKind::DetectorRun
        );
        assert_eq!(
            ApiWrapperKind::select(DistributionVersion::Es6, ExecutionMode::Bulk),
            ApiWrapperKind::Legacy
        );
        assert_eq!(
            ApiWrapperKind::select(DistributionVersion::Default, ExecutionMode::Bulk),
            ApiWrapperKind::Default
        );
    }

    #[test]
    fn the_one_where_the_backend_remembers_what_it_is() {
        let (_, transport) = test_support::in_mem();
        for kind in [ApiWrapperKind::Default, ApiWrapperKind::Legacy, ApiWrapperKind::DetectorRun] {
            assert_eq!(ApiWrapperBackend::new(kind, Arc::clone(&transport)).kind(), kind);
        }
    }
}
