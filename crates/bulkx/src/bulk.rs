//! 📦 Bulk — accumulate operations, estimate the size, seal, build the wire body once.
//!
//! 🧠 Knowledge graph:
//! - [`BulkAccumulator`] trait → [`UncompressedBulkAccumulator`] / [`CompressedBulkAccumulator`]
//!   → [`AccumulatorBackend`] enum (same trait → impls → enum shape as everywhere else in here)
//! - `seal()` consumes the open accumulator and returns a [`SealedBulkRequest`]
//! - [`AccumulatorFactory`] picks the estimator once per sink and stamps out fresh batches
//!
//! ⚠️ Accumulators are single-writer. The sink worker that owns one is the only thing that
//! ever touches it, so there is not a single lock in this module. Not one. We checked twice.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::documents::BulkOperation;

pub mod compressed;
pub mod request;
pub mod uncompressed;
pub(crate) mod writer;

pub use compressed::CompressedBulkAccumulator;
pub use request::{BulkRequest, BulkRequestParams, Refresh, SealedBulkRequest};
pub use uncompressed::UncompressedBulkAccumulator;

/// 📮 Flat per-operation envelope cost: action line, braces, newlines. Byte counting can't see it.
pub const OPERATION_OVERHEAD_BYTES: u64 = 50;

/// 🧺 An open, growing batch of operations.
///
/// # Contract 📜
/// - `estimate_size_with_operation` peeks. It never mutates.
/// - `add_operation` appends in order. Order is what the store executes, so order is law.
/// - `estimated_size_bytes` takes `&mut self` because the compressed estimator may take
///   its first real sample right then.
/// - `seal` ends the open phase. After it, the batch is read-only by construction.
pub trait BulkAccumulator {
    /// 🔮 What the estimate would be if `operation` were added. No mutation.
    fn estimate_size_with_operation(&self, operation: &BulkOperation) -> Result<u64>;

    /// ➕ Append `operation` and grow the estimate.
    fn add_operation(&mut self, operation: BulkOperation) -> Result<()>;

    /// 📏 The current size estimate in bytes.
    fn estimated_size_bytes(&mut self) -> Result<u64>;

    /// 👀 Read-only view of the batch, in insertion order.
    fn operations(&self) -> &[BulkOperation];

    /// 🔒 Close the batch for good.
    fn seal(self) -> SealedBulkRequest
    where
        Self: Sized;

    fn operations_count(&self) -> usize {
        self.operations().len()
    }

    fn operation_at(&self, index: usize) -> Option<&BulkOperation> {
        self.operations().get(index)
    }

    fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }
}

/// 🎭 Either estimator, behind one type the sink can hold without generics.
#[derive(Debug)]
pub enum AccumulatorBackend {
    Uncompressed(UncompressedBulkAccumulator),
    Compressed(CompressedBulkAccumulator),
}

impl BulkAccumulator for AccumulatorBackend {
    fn estimate_size_with_operation(&self, operation: &BulkOperation) -> Result<u64> {
        match self {
            AccumulatorBackend::Uncompressed(acc) => acc.estimate_size_with_operation(operation),
            AccumulatorBackend::Compressed(acc) => acc.estimate_size_with_operation(operation),
        }
    }

    fn add_operation(&mut self, operation: BulkOperation) -> Result<()> {
        match self {
            AccumulatorBackend::Uncompressed(acc) => acc.add_operation(operation),
            AccumulatorBackend::Compressed(acc) => acc.add_operation(operation),
        }
    }

    fn estimated_size_bytes(&mut self) -> Result<u64> {
        match self {
            AccumulatorBackend::Uncompressed(acc) => acc.estimated_size_bytes(),
            AccumulatorBackend::Compressed(acc) => acc.estimated_size_bytes(),
        }
    }

    fn operations(&self) -> &[BulkOperation] {
        match self {
            AccumulatorBackend::Uncompressed(acc) => acc.operations(),
            AccumulatorBackend::Compressed(acc) => acc.operations(),
        }
    }

    fn seal(self) -> SealedBulkRequest {
        match self {
            AccumulatorBackend::Uncompressed(acc) => acc.seal(),
            AccumulatorBackend::Compressed(acc) => acc.seal(),
        }
    }
}

/// 🧮 How a sink's batches get weighed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimationStrategy {
    Uncompressed,
    Compressed { max_local_compressions: u32 },
}

impl EstimationStrategy {
    /// 🎯 Compressed estimation only makes sense when the body is actually gzipped on the wire.
    ///
    /// Asking for it without request compression gets a warning and the plain estimator.
    pub fn select(
        estimate_using_compression: bool,
        request_compression_enabled: bool,
        max_local_compressions: u32,
    ) -> Self {
        match (estimate_using_compression, request_compression_enabled) {
            (true, true) => EstimationStrategy::Compressed {
                max_local_compressions,
            },
            (true, false) => {
                warn!(
                    "⚠️ Compressed bulk size estimation was requested but request compression is off. Estimating uncompressed bytes instead, since that's what will actually be sent."
                );
                EstimationStrategy::Uncompressed
            }
            (false, _) => EstimationStrategy::Uncompressed,
        }
    }
}

/// 🏭 Stamps out fresh, empty accumulators, all sharing one set of request params.
#[derive(Debug, Clone)]
pub struct AccumulatorFactory {
    params: Arc<BulkRequestParams>,
    target_bulk_size_bytes: u64,
    strategy: EstimationStrategy,
}

impl AccumulatorFactory {
    pub fn new(
        params: BulkRequestParams,
        target_bulk_size_bytes: u64,
        strategy: EstimationStrategy,
    ) -> Self {
        Self {
            params: Arc::new(params),
            target_bulk_size_bytes,
            strategy,
        }
    }

    pub fn strategy(&self) -> EstimationStrategy {
        self.strategy
    }

    pub fn target_bulk_size_bytes(&self) -> u64 {
        self.target_bulk_size_bytes
    }

    /// 🆕 A brand new, empty batch.
    pub fn new_accumulator(&self) -> AccumulatorBackend {
        match self.strategy {
            EstimationStrategy::Uncompressed => AccumulatorBackend::Uncompressed(
                UncompressedBulkAccumulator::new(Arc::clone(&self.params)),
            ),
            EstimationStrategy::Compressed {
                max_local_compressions,
            } => AccumulatorBackend::Compressed(CompressedBulkAccumulator::new(
                Arc::clone(&self.params),
                self.target_bulk_size_bytes,
                max_local_compressions,
            )),
        }
    }
}
