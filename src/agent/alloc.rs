//! Allocation counters for the runtime sampler
//!
//! The agent binary installs [`INSTRUMENTED_SYSTEM`] as its global
//! allocator:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;
//! ```
//!
//! Without it every counter reads zero.

use stats_alloc::Stats;

pub use stats_alloc::{INSTRUMENTED_SYSTEM, StatsAlloc};

/// Allocation counters since process start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently allocated
    pub live_bytes: u64,
    /// Bytes ever allocated
    pub total_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
}

impl AllocStats {
    /// Allocations not yet freed
    pub fn heap_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

impl From<Stats> for AllocStats {
    fn from(stats: Stats) -> Self {
        // realloc growth and shrinkage are already folded into the byte totals
        Self {
            live_bytes: stats.bytes_allocated.saturating_sub(stats.bytes_deallocated) as u64,
            total_bytes: stats.bytes_allocated as u64,
            mallocs: stats.allocations as u64,
            frees: stats.deallocations as u64,
        }
    }
}

/// Read the instrumented allocator's counters
pub fn current() -> AllocStats {
    INSTRUMENTED_SYSTEM.stats().into()
}
