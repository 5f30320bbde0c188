//! 📏 The plain accumulator: count the bytes, add the envelope, done.

use std::sync::Arc;

use anyhow::Result;

use crate::bulk::request::{BulkRequestParams, SealedBulkRequest};
use crate::bulk::{BulkAccumulator, OPERATION_OVERHEAD_BYTES};
use crate::documents::BulkOperation;

/// 📏 Sums `document_size_bytes + 50` per operation. No sampling, no guessing, no drama.
#[derive(Debug)]
pub struct UncompressedBulkAccumulator {
    params: Arc<BulkRequestParams>,
    operations: Vec<BulkOperation>,
    current_size_estimate_bytes: u64,
}

impl UncompressedBulkAccumulator {
    pub fn new(params: Arc<BulkRequestParams>) -> Self {
        Self {
            params,
            operations: Vec::new(),
            current_size_estimate_bytes: 0,
        }
    }

    fn weigh(operation: &BulkOperation) -> Result<u64> {
        Ok(operation.document_size_bytes()? as u64 + OPERATION_OVERHEAD_BYTES)
    }
}

impl BulkAccumulator for UncompressedBulkAccumulator {
    fn estimate_size_with_operation(&self, operation: &BulkOperation) -> Result<u64> {
        Ok(self.current_size_estimate_bytes + Self::weigh(operation)?)
    }

    fn add_operation(&mut self, operation: BulkOperation) -> Result<()> {
        // -- weigh first: a failed measurement must leave the batch untouched
        let weight = Self::weigh(&operation)?;
        self.operations.push(operation);
        self.current_size_estimate_bytes += weight;
        Ok(())
    }

    fn estimated_size_bytes(&mut self) -> Result<u64> {
        Ok(self.current_size_estimate_bytes)
    }

    fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    fn seal(self) -> SealedBulkRequest {
        SealedBulkRequest::new(self.params, self.operations, self.current_size_estimate_bytes)
    }
}
