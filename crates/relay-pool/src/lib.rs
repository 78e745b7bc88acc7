//! relay-pool — two-tier pooled allocation for high-churn router objects.
//!
//! Worker threads allocate and free the same handful of small types
//! (buffers, deliveries, iterators) at very high rates. This crate gives
//! each such type a dedicated pool with:
//!
//! - a per-thread free list (no lock on the hot path),
//! - a global free list, rebalanced against thread lists in whole batches
//!   under a per-type mutex,
//! - optional heap shedding when the global list is capped,
//! - debug-build red zones (front/back sentinels plus a descriptor
//!   back-reference that catches double frees), and
//! - per-type counters exposed to the management agent as
//!   [`PoolRecord`]s.
//!
//! # Example
//!
//! ```
//! use relay_pool::{alloc, pool_type};
//!
//! struct Delivery {
//!     tag: u64,
//! }
//! pool_type!(Delivery, "delivery");
//!
//! let d = alloc(Delivery { tag: 9 }).expect("out of memory");
//! assert_eq!(d.tag, 9);
//! // Dropping returns the slot to this thread's free list.
//! drop(d);
//! ```

mod config;
mod pool;
mod records;

pub use config::{AllocConfig, BIG_THRESHOLD};
pub use pool::{alloc, global_free_len, stats, AllocStats, LocalCache, PoolBox, Pooled, TypeDesc};
pub use records::{pool_records, PoolRecord};
