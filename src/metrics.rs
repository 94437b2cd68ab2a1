use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing index rebuilds and query traffic.
#[derive(Default)]
pub struct RagMetrics {
    rebuilds: AtomicU64,
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_served: AtomicU64,
    extractive_fallbacks: AtomicU64,
}

impl RagMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed rebuild. Document and chunk gauges describe the latest index only.
    pub fn record_rebuild(&self, document_count: u64, chunk_count: u64) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.documents_indexed
            .store(document_count, Ordering::Relaxed);
        self.chunks_indexed.store(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered query and whether a failed synthesis fell back to the extractive answer.
    pub fn record_query(&self, fell_back: bool) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.extractive_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            extractive_fallbacks: self.extractive_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of completed index rebuilds since startup.
    pub rebuilds: u64,
    /// Documents in the most recent rebuild.
    pub documents_indexed: u64,
    /// Chunks in the most recent rebuild.
    pub chunks_indexed: u64,
    /// Queries answered since startup.
    pub queries_served: u64,
    /// Queries whose synthesized answer failed or came back empty.
    pub extractive_fallbacks: u64,
}
