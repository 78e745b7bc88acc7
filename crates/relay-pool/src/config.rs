/// Free-list tuning for one pooled type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocConfig {
    /// Number of items moved per rebalance between a thread list and the
    /// global list, and per heap refill.
    pub transfer_batch_size: usize,
    /// High-water mark for a thread's free list; exceeding it triggers a
    /// rebalance toward the global list.
    pub local_free_list_max: usize,
    /// High-water mark for the global free list; 0 means unbounded.
    /// Excess items are returned to the heap during rebalance.
    pub global_free_list_max: usize,
}

impl AllocConfig {
    /// Creates a configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `transfer_batch_size` is 0 or if `local_free_list_max` is
    /// smaller than `transfer_batch_size` (a rebalance must always be able
    /// to move a whole batch).
    pub const fn new(
        transfer_batch_size: usize,
        local_free_list_max: usize,
        global_free_list_max: usize,
    ) -> Self {
        assert!(transfer_batch_size > 0, "transfer batch must be non-empty");
        assert!(
            local_free_list_max >= transfer_batch_size,
            "local free-list max must hold at least one transfer batch"
        );

        Self {
            transfer_batch_size,
            local_free_list_max,
            global_free_list_max,
        }
    }

    /// Default configuration for types larger than [`BIG_THRESHOLD`].
    pub const fn big() -> Self {
        Self::new(16, 32, 0)
    }

    /// Default configuration for small types.
    pub const fn small() -> Self {
        Self::new(64, 128, 0)
    }
}

/// Item size above which [`AllocConfig::big`] is selected by default.
pub const BIG_THRESHOLD: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_hold_a_batch() {
        assert!(AllocConfig::big().local_free_list_max >= AllocConfig::big().transfer_batch_size);
        assert!(
            AllocConfig::small().local_free_list_max >= AllocConfig::small().transfer_batch_size
        );
    }

    #[test]
    #[should_panic(expected = "local free-list max")]
    fn rejects_local_max_below_batch() {
        let _ = AllocConfig::new(8, 4, 0);
    }
}
