//! 📊 Sink metrics — lock-free counters, shared by every worker and every in-flight request.
//!
//! Relaxed atomics all the way down. These are tallies for a summary table, not a
//! synchronization mechanism. Nobody makes decisions based on them mid-flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// 📊 Running tallies for one pipeline run.
#[derive(Debug, Default)]
pub struct SinkMetrics {
    documents_succeeded: AtomicU64,
    documents_duplicated: AtomicU64,
    documents_failed: AtomicU64,
    version_conflicts: AtomicU64,
    bulk_requests_sent: AtomicU64,
    bulk_requests_failed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_estimated: AtomicU64,
}

/// 📸 A point-in-time copy of [`SinkMetrics`], safe to print and compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub documents_succeeded: u64,
    pub documents_duplicated: u64,
    pub documents_failed: u64,
    pub version_conflicts: u64,
    pub bulk_requests_sent: u64,
    pub bulk_requests_failed: u64,
    pub bytes_sent: u64,
    pub bytes_estimated: u64,
}

impl SinkMetrics {
    /// ✅ One document landed. `duplicate` when it overwrote an existing sequence number.
    pub fn record_document_succeeded(&self, duplicate: bool) {
        self.documents_succeeded.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.documents_duplicated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_document_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// 📡 A request went out. Counted before we know how it went.
    pub fn record_bulk_request_sent(&self, body_bytes: u64, estimated_bytes: u64) {
        self.bulk_requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(body_bytes, Ordering::Relaxed);
        self.bytes_estimated.fetch_add(estimated_bytes, Ordering::Relaxed);
    }

    /// 💥 A whole request failed, taking `operations` documents with it.
    pub fn record_bulk_request_failed(&self, operations: u64) {
        self.bulk_requests_failed.fetch_add(1, Ordering::Relaxed);
        self.documents_failed.fetch_add(operations, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_succeeded: self.documents_succeeded.load(Ordering::Relaxed),
            documents_duplicated: self.documents_duplicated.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            bulk_requests_sent: self.bulk_requests_sent.load(Ordering::Relaxed),
            bulk_requests_failed: self.bulk_requests_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_estimated: self.bytes_estimated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_failed_request_fails_all_its_documents() {
        let metrics = SinkMetrics::default();
        metrics.record_bulk_request_sent(900, 1000);
        metrics.record_bulk_request_failed(7);
        metrics.record_document_succeeded(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bulk_requests_sent, 1);
        assert_eq!(snapshot.bulk_requests_failed, 1);
        assert_eq!(snapshot.documents_failed, 7);
        assert_eq!(snapshot.documents_succeeded, 1);
        assert_eq!(snapshot.documents_duplicated, 1);
        assert_eq!(snapshot.bytes_sent, 900);
        assert_eq!(snapshot.bytes_estimated, 1000);
    }
}
