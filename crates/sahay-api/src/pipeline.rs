// crates/sahay-api/src/pipeline.rs
// ============================================================================
// Module: Analytics Aggregation Buffer
// Description: Mutex-guarded in-memory count map with threshold flushes.
// Purpose: Batch de-identified events into aggregate UPSERTs.
// Dependencies: sahay-core
// ============================================================================

//! ## Overview
//! The buffer is the only shared mutable state in the process and is
//! protected by a single mutex. Recording an event increments its aggregate
//! key; the flush path moves all entries out while holding the lock briefly,
//! then releases it before any database UPSERT runs. Flushes fire when the
//! map reaches the configured threshold, when the flush timer ticks, or on
//! explicit request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use sahay_core::AggregateKey;
use sahay_core::core::analytics::DeidentifiedEvent;

// ============================================================================
// SECTION: Buffer
// ============================================================================

/// Mutex-guarded aggregation buffer.
#[derive(Debug)]
pub struct AnalyticsBuffer {
    /// Pending counts by aggregate key.
    entries: Mutex<HashMap<AggregateKey, u64>>,
    /// Entry count that triggers a flush.
    flush_threshold: usize,
}

impl AnalyticsBuffer {
    /// Creates a buffer with a flush threshold.
    #[must_use]
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Records one event. Returns true when the buffer reached its flush
    /// threshold and should be drained.
    pub fn record(&self, event: &DeidentifiedEvent) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        *entries.entry(event.aggregate_key()).or_insert(0) += 1;
        entries.len() >= self.flush_threshold
    }

    /// Moves all pending entries out of the buffer.
    ///
    /// The lock is held only for the move; callers run their UPSERTs after
    /// this returns.
    #[must_use]
    pub fn drain(&self) -> Vec<(AggregateKey, u64)> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries.drain().collect()
    }

    /// Returns the number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Returns true when no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
