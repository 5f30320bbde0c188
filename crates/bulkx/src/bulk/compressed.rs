//! 🫁 The compressed accumulator — estimating gzip'd wire bytes without gzipping every time.
//!
//! When the transport gzips request bodies, the raw document size is a terrible predictor of
//! what actually goes over the wire. Repetitive JSON compresses 10x. Random ids compress 1.1x.
//! So instead of guessing, we *measure*: every so often we gzip the whole batch for real, learn
//! the average compressed bytes per operation, and extrapolate linearly until the next sample.
//!
//! 🧠 The schedule:
//! 1. first real sample at 10 operations
//! 2. after each sample: if less than 10% of the target is left, or fewer than 100 operations
//!    are estimated to fit, stop scheduling samples (the last average is good enough)
//! 3. otherwise the next sample lands halfway through the estimated remaining operations
//! 4. never more than `max_local_compressions` real samples per batch. Compression is not free.
//!
//! The magic numbers are empirical. They work. Nobody has proved they are optimal, and
//! nobody here is going to pretend otherwise. 🦆

use std::sync::Arc;

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, trace};

use crate::bulk::request::{BulkRequestParams, SealedBulkRequest};
use crate::bulk::{BulkAccumulator, OPERATION_OVERHEAD_BYTES, writer};
use crate::documents::{BulkOperation, ByteCounter};
use crate::error::BulkError;

const INITIAL_SAMPLE_SIZE: usize = 10;
const STOP_ADAPTING_REMAINING_RATIO: f64 = 0.10;
const STOP_ADAPTING_REMAINING_OPERATIONS: f64 = 100.0;

/// 🫁 Adaptive compressed-size accumulator. One per batch; state dies with the batch.
#[derive(Debug)]
pub struct CompressedBulkAccumulator {
    params: Arc<BulkRequestParams>,
    operations: Vec<BulkOperation>,
    current_size_estimate_bytes: u64,
    target_bulk_size_bytes: u64,
    sample_size: usize,
    times_sampled: u32,
    max_local_compressions: u32,
    average_compressed_bytes_per_operation: f64,
}

impl CompressedBulkAccumulator {
    /// 🏗️ `max_local_compressions` below 1 is treated as 1: a batch always gets one real look.
    pub fn new(
        params: Arc<BulkRequestParams>,
        target_bulk_size_bytes: u64,
        max_local_compressions: u32,
    ) -> Self {
        Self {
            params,
            operations: Vec::new(),
            current_size_estimate_bytes: 0,
            target_bulk_size_bytes,
            sample_size: INITIAL_SAMPLE_SIZE,
            times_sampled: 0,
            max_local_compressions: max_local_compressions.max(1),
            average_compressed_bytes_per_operation: 0.0,
        }
    }

    pub fn times_sampled(&self) -> u32 {
        self.times_sampled
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn average_compressed_bytes_per_operation(&self) -> f64 {
        self.average_compressed_bytes_per_operation
    }

    /// 🔬 gzip the batch's documents as one JSON array and count the output bytes.
    ///
    /// Documentless operations never enter the array; each one is charged the flat overhead.
    fn measure(&self) -> Result<u64> {
        let mut encoder = GzEncoder::new(ByteCounter::default(), Compression::default());
        writer::write_document_array(&mut encoder, &self.operations)
            .map_err(BulkError::Estimation)?;
        let compressed = encoder.finish().map_err(BulkError::Estimation)?;
        let documentless = self
            .operations
            .iter()
            .filter(|operation| operation.document().is_none())
            .count() as u64;
        Ok(compressed.0 as u64 + documentless * OPERATION_OVERHEAD_BYTES)
    }

    /// 📐 Take a real sample: replace the running estimate with the truth and re-derive the average.
    fn sample(&mut self) -> Result<()> {
        let measured = self.measure()?;
        self.record_sample(measured);
        Ok(())
    }

    fn record_sample(&mut self, measured: u64) {
        self.current_size_estimate_bytes = measured;
        self.average_compressed_bytes_per_operation =
            self.current_size_estimate_bytes as f64 / self.operations.len() as f64;
        self.times_sampled += 1;
        debug!(
            "🔬 Compressed sample #{}: {} operations → {} bytes ({:.1} bytes/op)",
            self.times_sampled,
            self.operations.len(),
            self.current_size_estimate_bytes,
            self.average_compressed_bytes_per_operation
        );
    }

    /// ➕ What one more operation adds between samples. Deletes never ride the document average.
    fn increment_for(&self, operation: &BulkOperation) -> u64 {
        match operation.document() {
            Some(_) => self.average_compressed_bytes_per_operation as u64,
            None => OPERATION_OVERHEAD_BYTES,
        }
    }

    /// 📥 Append, and sample if the schedule says so. A failed sample leaves the batch as it was.
    fn push_and_estimate(
        &mut self,
        operation: BulkOperation,
        measure: impl FnOnce(&Self) -> Result<u64>,
    ) -> Result<()> {
        let increment = self.increment_for(&operation);
        self.operations.push(operation);

        if self.operations.len() == self.sample_size && self.times_sampled < self.max_local_compressions {
            match measure(&*self) {
                Ok(measured) => self.record_sample(measured),
                Err(err) => {
                    self.operations.pop();
                    return Err(err);
                }
            }
            self.schedule_next_sample();
        } else {
            self.current_size_estimate_bytes += increment;
        }
        Ok(())
    }

    /// 🗓️ Decide when (if ever) the next sample happens.
    fn schedule_next_sample(&mut self) {
        let target = self.target_bulk_size_bytes as f64;
        let remaining = target - self.current_size_estimate_bytes as f64;
        if target <= 0.0 || remaining / target < STOP_ADAPTING_REMAINING_RATIO {
            trace!("🛑 Under 10% of the target left; trusting the last sample for the rest of the batch");
            return;
        }
        if self.average_compressed_bytes_per_operation <= 0.0 {
            return;
        }
        let estimated_remaining_operations = remaining / self.average_compressed_bytes_per_operation;
        if estimated_remaining_operations < STOP_ADAPTING_REMAINING_OPERATIONS {
            trace!("🛑 Fewer than 100 operations left by estimate; another sample isn't worth it");
            return;
        }
        self.sample_size += (estimated_remaining_operations / 2.0) as usize;
        trace!("🗓️ Next compressed sample at {} operations", self.sample_size);
    }
}

impl BulkAccumulator for CompressedBulkAccumulator {
    fn estimate_size_with_operation(&self, operation: &BulkOperation) -> Result<u64> {
        Ok(self.current_size_estimate_bytes + self.increment_for(operation))
    }

    fn add_operation(&mut self, operation: BulkOperation) -> Result<()> {
        // -- measure now so structured documents that can't serialize fail the add, not the sample
        operation.document_size_bytes()?;
        self.push_and_estimate(operation, Self::measure)
    }

    /// 📏 The running estimate. The very first ask on a non-empty batch takes a real sample.
    fn estimated_size_bytes(&mut self) -> Result<u64> {
        if self.times_sampled == 0 && !self.operations.is_empty() {
            self.sample()?;
        }
        Ok(self.current_size_estimate_bytes)
    }

    fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    fn seal(self) -> SealedBulkRequest {
        SealedBulkRequest::new(self.params, self.operations, self.current_size_estimate_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::SerializedDocument;
    use std::io::Write;

    fn doc(n: usize) -> Result<BulkOperation> {
        let body = format!(r#"{{"id":{n},"message":"the quick brown fox number {n}","level":"info"}}"#);
        Ok(BulkOperation::index(SerializedDocument::from_raw(body)?))
    }

    fn gzip_len(bytes: &[u8]) -> Result<u64> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?.len() as u64)
    }

    #[test]
    fn the_one_where_the_first_size_question_forces_one_real_sample() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        for n in 0..3 {
            acc.add_operation(doc(n)?)?;
        }
        // 🧪 before anyone asks, nothing has been measured and the average is zero
        assert_eq!(acc.times_sampled(), 0);
        assert_eq!(acc.estimate_size_with_operation(&doc(99)?)?, 0);

        let size = acc.estimated_size_bytes()?;
        assert_eq!(acc.times_sampled(), 1);
        assert!(size > 0);
        assert_eq!(acc.average_compressed_bytes_per_operation(), size as f64 / 3.0);

        // 🧪 the second ask is free
        assert_eq!(acc.estimated_size_bytes()?, size);
        assert_eq!(acc.times_sampled(), 1);
        Ok(())
    }

    #[test]
    fn the_one_where_the_measurement_is_the_gzipped_document_array() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        let operations: Vec<_> = (0..4).map(doc).collect::<Result<_>>()?;
        let mut array = Vec::new();
        writer::write_document_array(&mut array, &operations)?;
        for op in operations {
            acc.add_operation(op)?;
        }
        assert_eq!(acc.estimated_size_bytes()?, gzip_len(&array)?);
        Ok(())
    }

    #[test]
    fn the_one_where_the_tenth_operation_triggers_a_sample_and_a_new_schedule() -> Result<()> {
        let target = 5 * 1024 * 1024;
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), target, 2);
        for n in 0..10 {
            acc.add_operation(doc(n)?)?;
        }
        assert_eq!(acc.times_sampled(), 1);
        let average = acc.average_compressed_bytes_per_operation();
        let measured = acc.estimated_size_bytes()?;
        assert_eq!(average, measured as f64 / 10.0);

        let remaining_ops = (target as f64 - measured as f64) / average;
        assert_eq!(acc.sample_size(), 10 + (remaining_ops / 2.0) as usize);
        Ok(())
    }

    #[test]
    fn the_one_where_operations_between_samples_ride_the_average() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        for n in 0..10 {
            acc.add_operation(doc(n)?)?;
        }
        let after_sample = acc.estimated_size_bytes()?;
        let step = acc.average_compressed_bytes_per_operation() as u64;
        assert_eq!(acc.estimate_size_with_operation(&doc(10)?)?, after_sample + step);

        acc.add_operation(doc(10)?)?;
        acc.add_operation(doc(11)?)?;
        assert_eq!(acc.estimated_size_bytes()?, after_sample + 2 * step);
        Ok(())
    }

    #[test]
    fn the_one_where_sampling_never_exceeds_the_budget() -> Result<()> {
        // -- tiny documents and a big target keep the scheduler wanting more samples
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 64 * 1024, 2);
        for n in 0..20_000 {
            acc.add_operation(doc(n)?)?;
            assert!(acc.times_sampled() <= 2);
        }
        acc.estimated_size_bytes()?;
        assert_eq!(acc.times_sampled(), 2);
        Ok(())
    }

    #[test]
    fn the_one_where_a_nearly_full_batch_stops_adapting() -> Result<()> {
        // -- the first sample alone eats more than 90% of a tiny target
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 100, 5);
        for n in 0..10 {
            acc.add_operation(doc(n)?)?;
        }
        assert_eq!(acc.times_sampled(), 1);
        assert_eq!(acc.sample_size(), 10);
        for n in 10..50 {
            acc.add_operation(doc(n)?)?;
        }
        assert_eq!(acc.times_sampled(), 1);
        Ok(())
    }

    #[test]
    fn the_one_where_deletes_pay_the_flat_fee_instead_of_being_squeezed() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        for n in 0..3 {
            acc.add_operation(BulkOperation::delete().with_id(n.to_string()))?;
        }
        let expected = gzip_len(b"[]")? + 3 * OPERATION_OVERHEAD_BYTES;
        assert_eq!(acc.estimated_size_bytes()?, expected);
        Ok(())
    }

    #[test]
    fn the_one_where_a_delete_after_the_sample_still_pays_only_the_flat_fee() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        for n in 0..10 {
            acc.add_operation(doc(n)?)?;
        }
        assert_eq!(acc.times_sampled(), 1);
        let before = acc.estimated_size_bytes()?;
        let delete = BulkOperation::delete().with_id("gone");

        assert_eq!(acc.estimate_size_with_operation(&delete)?, before + OPERATION_OVERHEAD_BYTES);
        acc.add_operation(delete)?;
        assert_eq!(acc.estimated_size_bytes()? - before, OPERATION_OVERHEAD_BYTES);

        // 🧪 documents keep riding the average right next to it
        let step = acc.average_compressed_bytes_per_operation() as u64;
        acc.add_operation(doc(11)?)?;
        assert_eq!(acc.estimated_size_bytes()?, before + OPERATION_OVERHEAD_BYTES + step);
        Ok(())
    }

    #[test]
    fn the_one_where_too_few_operations_fit_to_bother_sampling_again() -> Result<()> {
        // -- same ten documents, same measurement: learn it once on an unbounded batch
        let mut reference = CompressedBulkAccumulator::new(Arc::default(), u64::MAX, 5);
        for n in 0..10 {
            reference.add_operation(doc(n)?)?;
        }
        let measured = reference.estimated_size_bytes()?;
        let average = reference.average_compressed_bytes_per_operation();

        // -- room for ~50 more: well over 10% of the target is left, but under 100 operations
        let target = measured + (average * 50.0) as u64;
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), target, 5);
        for n in 0..10 {
            acc.add_operation(doc(n)?)?;
        }
        let remaining = (target - acc.estimated_size_bytes()?) as f64;
        assert!(remaining / target as f64 >= STOP_ADAPTING_REMAINING_RATIO);
        assert!(remaining / acc.average_compressed_bytes_per_operation() < STOP_ADAPTING_REMAINING_OPERATIONS);
        assert_eq!(acc.times_sampled(), 1);
        assert_eq!(acc.sample_size(), INITIAL_SAMPLE_SIZE);

        for n in 10..40 {
            acc.add_operation(doc(n)?)?;
        }
        assert_eq!(acc.times_sampled(), 1);
        assert_eq!(acc.sample_size(), INITIAL_SAMPLE_SIZE);
        Ok(())
    }

    #[test]
    fn the_one_where_a_failed_sample_hands_the_operation_back() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 5 * 1024 * 1024, 2);
        for n in 0..9 {
            acc.add_operation(doc(n)?)?;
        }
        let result = acc.push_and_estimate(doc(9)?, |_| {
            Err(BulkError::Estimation(std::io::Error::other("gzip went sideways")).into())
        });

        assert!(result.is_err());
        assert_eq!(acc.operations_count(), 9);
        assert_eq!(acc.times_sampled(), 0);
        assert_eq!(acc.current_size_estimate_bytes, 0);

        // 🧪 the same operation goes in cleanly on the retry and the sample happens
        acc.add_operation(doc(9)?)?;
        assert_eq!(acc.operations_count(), 10);
        assert_eq!(acc.times_sampled(), 1);
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_batch_weighs_nothing_and_measures_nothing() -> Result<()> {
        let mut acc = CompressedBulkAccumulator::new(Arc::default(), 1024, 2);
        assert_eq!(acc.estimated_size_bytes()?, 0);
        assert_eq!(acc.times_sampled(), 0);
        Ok(())
    }
}
