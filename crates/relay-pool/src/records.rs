//! Management-agent view of the allocator.
//!
//! The management collaborator enumerates one record per initialized pool
//! type on demand; nothing here touches the allocation fast path.

use crate::pool::registered;
use serde::Serialize;

/// Per-type snapshot handed to the management agent.
#[derive(Debug, Clone, Serialize)]
pub struct PoolRecord {
    pub name: &'static str,
    pub type_size: usize,
    pub transfer_batch_size: usize,
    pub local_free_list_max: usize,
    pub global_free_list_max: usize,
    pub total_alloc_from_heap: u64,
    pub total_free_to_heap: u64,
    pub held_by_threads: u64,
    pub batches_rebalanced_to_threads: u64,
    pub batches_rebalanced_to_global: u64,
}

/// Snapshots every pool type that has been initialized so far, in
/// initialization order.
pub fn pool_records() -> Vec<PoolRecord> {
    registered()
        .into_iter()
        .map(|desc| {
            let (config, stats, _) = desc.stats_snapshot();
            PoolRecord {
                name: desc.name(),
                type_size: desc.total_size(),
                transfer_batch_size: config.transfer_batch_size,
                local_free_list_max: config.local_free_list_max,
                global_free_list_max: config.global_free_list_max,
                total_alloc_from_heap: stats.total_alloc_from_heap,
                total_free_to_heap: stats.total_free_to_heap,
                held_by_threads: stats.held_by_threads,
                batches_rebalanced_to_threads: stats.batches_rebalanced_to_threads,
                batches_rebalanced_to_global: stats.batches_rebalanced_to_global,
            }
        })
        .collect()
}
