use crate::config::{AllocConfig, BIG_THRESHOLD};
use crossbeam_utils::CachePadded;
use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

// =============================================================================
// MEMORY LAYOUT & OWNERSHIP
// =============================================================================
//
// Every pooled item is one raw heap allocation:
//
//     [ debug header | payload (type_size + extra_size) | debug back sentinel ]
//
// The debug header carries a front sentinel and a back-reference to the type
// descriptor; both red zones exist only in debug builds. The payload begins
// with the pooled `T` value, optionally followed by `extra_size` raw bytes
// (a buffer's byte storage lives there).
//
// Ownership moves through three stations:
//
// 1. `PoolBox<T>` — the live item, owned by exactly one caller.
// 2. A thread's `LocalCache` — free items, touched without any lock.
// 3. The type's global free list — free items, under the type mutex.
//
// The type mutex is taken only while rebalancing whole batches between
// stations 2 and 3 (and during one-time initialization), never on the alloc
// or dealloc fast path.
//
// =============================================================================

pub(crate) const PATTERN_FRONT: u32 = 0xdead_beef;
pub(crate) const PATTERN_BACK: u32 = 0xbabe_cafe;

/// Per-type monotonic counters, mutated only under the type mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocStats {
    pub total_alloc_from_heap: u64,
    pub total_free_to_heap: u64,
    /// Net estimate of items outside the global pool (live or on a thread's
    /// free list). Credited per item on heap refill and per batch on
    /// rebalance-to-threads; debited per batch on rebalance-to-global.
    pub held_by_threads: u64,
    pub batches_rebalanced_to_threads: u64,
    pub batches_rebalanced_to_global: u64,
}

/// A free item: the base pointer of its raw allocation.
struct RawItem(NonNull<u8>);

// SAFETY: a free item is plain memory with no thread affinity; it only moves
// between lists while no `PoolBox` refers to it.
unsafe impl Send for RawItem {}

struct GlobalState {
    free: VecDeque<RawItem>,
    stats: AllocStats,
}

/// Lazily created shared state for one pooled type.
pub(crate) struct SharedPool {
    header: u32,
    total_size: usize,
    payload_offset: usize,
    layout: Layout,
    config: AllocConfig,
    state: CachePadded<Mutex<GlobalState>>,
    trailer: u32,
}

impl SharedPool {
    fn lock_state(&self) -> MutexGuard<'_, GlobalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(debug_assertions)]
#[repr(C)]
struct ItemHeader {
    desc: *const TypeDesc,
    front: u32,
}

/// Static descriptor for one pooled type; created by [`pool_type!`].
pub struct TypeDesc {
    name: &'static str,
    type_size: usize,
    type_align: usize,
    extra_size: Option<fn() -> usize>,
    config: Option<AllocConfig>,
    shared: OnceLock<SharedPool>,
}

static REGISTRY: Mutex<Vec<&'static TypeDesc>> = Mutex::new(Vec::new());

pub(crate) fn registered() -> Vec<&'static TypeDesc> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

impl TypeDesc {
    #[doc(hidden)]
    pub const fn new(
        name: &'static str,
        type_size: usize,
        type_align: usize,
        extra_size: Option<fn() -> usize>,
        config: Option<AllocConfig>,
    ) -> Self {
        Self {
            name,
            type_size,
            type_align,
            extra_size,
            config,
            shared: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total payload size: the type itself plus its runtime extra bytes.
    /// Valid once the pool has initialized.
    pub fn total_size(&'static self) -> usize {
        self.shared().total_size
    }

    pub(crate) fn shared(&'static self) -> &'static SharedPool {
        self.shared.get_or_init(|| {
            let extra = self.extra_size.map_or(0, |f| f());
            let total_size = self.type_size + extra;
            let config = self.config.unwrap_or(if total_size > BIG_THRESHOLD {
                AllocConfig::big()
            } else {
                AllocConfig::small()
            });
            assert!(config.local_free_list_max >= config.transfer_batch_size);

            #[cfg(debug_assertions)]
            let (align, payload_offset) = {
                let align = if self.type_align > mem::align_of::<ItemHeader>() {
                    self.type_align
                } else {
                    mem::align_of::<ItemHeader>()
                };
                (align, round_up(mem::size_of::<ItemHeader>(), self.type_align))
            };
            #[cfg(not(debug_assertions))]
            let (align, payload_offset) = (self.type_align, 0);

            let mut alloc_size = payload_offset + total_size;
            if cfg!(debug_assertions) {
                alloc_size += mem::size_of::<u32>();
            }
            let layout = Layout::from_size_align(round_up(alloc_size, align), align)
                .expect("pool item layout overflows");

            REGISTRY
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self);
            tracing::trace!(type_name = self.name, total_size, "pool type initialized");

            SharedPool {
                header: PATTERN_FRONT,
                total_size,
                payload_offset,
                layout,
                config,
                state: CachePadded::new(Mutex::new(GlobalState {
                    free: VecDeque::new(),
                    stats: AllocStats::default(),
                })),
                trailer: PATTERN_BACK,
            }
        })
    }

    pub(crate) fn stats_snapshot(&'static self) -> (AllocConfig, AllocStats, usize) {
        let shared = self.shared();
        let state = shared.lock_state();
        (shared.config, state.stats, state.free.len())
    }
}

/// Types that live in a two-tier pool.
///
/// # Safety
///
/// Implementations must come from [`pool_type!`]: the descriptor must be
/// unique to the type, and `with_local` must hand out the calling thread's
/// cache for that same descriptor.
pub unsafe trait Pooled: Sized + Send + 'static {
    fn descriptor() -> &'static TypeDesc;
    fn with_local<R>(f: impl FnOnce(&LocalCache) -> R) -> R;
    fn try_with_local<R>(f: impl FnOnce(&LocalCache) -> R) -> Option<R>;
}

/// One thread's free list for one pooled type. No lock is taken while an
/// item is pushed to or popped from it.
pub struct LocalCache {
    desc: &'static TypeDesc,
    items: RefCell<VecDeque<RawItem>>,
}

impl LocalCache {
    #[doc(hidden)]
    pub fn new(desc: &'static TypeDesc) -> Self {
        Self {
            desc,
            items: RefCell::new(VecDeque::new()),
        }
    }

    /// Pop a free item, rebalancing from the global list (or refilling from
    /// the heap) when the local list is empty.
    fn take(&self, shared: &SharedPool) -> Option<RawItem> {
        let mut list = self.items.borrow_mut();
        if let Some(item) = list.pop_front() {
            return Some(item);
        }

        let batch = shared.config.transfer_batch_size;
        let mut state = shared.lock_state();
        if state.free.len() >= batch {
            // Rebalance a full batch from the global free list.
            state.stats.batches_rebalanced_to_threads += 1;
            state.stats.held_by_threads += batch as u64;
            for _ in 0..batch {
                if let Some(item) = state.free.pop_front() {
                    list.push_back(item);
                }
            }
        } else {
            // Refill a full batch from the heap.
            for _ in 0..batch {
                // SAFETY: the layout was validated at pool initialization
                // and is non-zero-sized (it always covers `T`).
                let raw = unsafe { std::alloc::alloc(shared.layout) };
                let Some(item) = NonNull::new(raw) else {
                    break;
                };
                list.push_back(RawItem(item));
                state.stats.held_by_threads += 1;
                state.stats.total_alloc_from_heap += 1;
            }
        }
        drop(state);

        list.pop_front()
    }

    /// Push a freed item, rebalancing a batch toward the global list when
    /// the local high-water mark is exceeded.
    fn put(&self, shared: &SharedPool, item: RawItem) {
        let mut list = self.items.borrow_mut();
        list.push_back(item);
        if list.len() <= shared.config.local_free_list_max {
            return;
        }

        let batch = shared.config.transfer_batch_size;
        let mut state = shared.lock_state();
        state.stats.batches_rebalanced_to_global += 1;
        state.stats.held_by_threads -= batch as u64;
        for _ in 0..batch {
            if let Some(item) = list.pop_front() {
                state.free.push_back(item);
            }
        }

        // A bounded global list sheds its excess to the heap.
        if shared.config.global_free_list_max != 0 {
            while state.free.len() > shared.config.global_free_list_max {
                if let Some(item) = state.free.pop_front() {
                    // SAFETY: the item came out of this pool's free list and
                    // no PoolBox refers to it.
                    unsafe { std::alloc::dealloc(item.0.as_ptr(), shared.layout) };
                    state.stats.total_free_to_heap += 1;
                }
            }
        }
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        // Thread exit: hand everything on the local list back to the global
        // pool so the conservation invariant holds across thread lifetimes.
        let Some(shared) = self.desc.shared.get() else {
            return;
        };
        let mut list = self.items.borrow_mut();
        if list.is_empty() {
            return;
        }
        let mut state = shared.lock_state();
        let n = list.len() as u64;
        state.stats.held_by_threads = state.stats.held_by_threads.saturating_sub(n);
        state.free.extend(list.drain(..));
    }
}

// -----------------------------------------------------------------------------
// Debug red zones
// -----------------------------------------------------------------------------

#[cfg(debug_assertions)]
unsafe fn stamp_on_alloc(shared: &SharedPool, desc: &'static TypeDesc, item: NonNull<u8>) {
    let hdr = item.as_ptr().cast::<ItemHeader>();
    (*hdr).desc = desc;
    (*hdr).front = PATTERN_FRONT;
    let back = item.as_ptr().add(shared.payload_offset + shared.total_size);
    ptr::write_unaligned(back.cast::<u32>(), PATTERN_BACK);
}

#[cfg(debug_assertions)]
unsafe fn verify_on_free(shared: &SharedPool, desc: &'static TypeDesc, item: NonNull<u8>) {
    assert_eq!(shared.header, PATTERN_FRONT, "pool descriptor corrupted");
    assert_eq!(shared.trailer, PATTERN_BACK, "pool descriptor corrupted");

    let hdr = &mut *item.as_ptr().cast::<ItemHeader>();
    assert_eq!(
        hdr.front, PATTERN_FRONT,
        "front red zone overwritten on a {} item",
        desc.name
    );
    let back = item.as_ptr().add(shared.payload_offset + shared.total_size);
    assert_eq!(
        ptr::read_unaligned(back.cast::<u32>()),
        PATTERN_BACK,
        "back red zone overwritten on a {} item",
        desc.name
    );
    assert!(
        ptr::eq(hdr.desc, desc),
        "{} item double-freed or freed against the wrong pool",
        desc.name
    );
    hdr.desc = ptr::null();
}

// -----------------------------------------------------------------------------
// Allocation / deallocation
// -----------------------------------------------------------------------------

/// Allocates a pooled slot for `value`.
///
/// Returns `None` only on heap exhaustion; callers treat that as fatal for
/// the operation at hand.
pub fn alloc<T: Pooled>(value: T) -> Option<PoolBox<T>> {
    let desc = T::descriptor();
    let shared = desc.shared();
    debug_assert_eq!(shared.header, PATTERN_FRONT);
    debug_assert_eq!(shared.trailer, PATTERN_BACK);

    let item = T::with_local(|cache| cache.take(shared))?;
    // SAFETY: the item is a live allocation of this pool's layout; the
    // payload region is big enough for `T` (total_size >= type_size) and
    // properly aligned by construction.
    unsafe {
        #[cfg(debug_assertions)]
        stamp_on_alloc(shared, desc, item.0);
        let payload = item.0.as_ptr().add(shared.payload_offset).cast::<T>();
        ptr::write(payload, value);
        Some(PoolBox {
            ptr: NonNull::new_unchecked(payload),
        })
    }
}

fn dealloc_raw<T: Pooled>(payload: NonNull<T>) {
    let desc = T::descriptor();
    let shared = desc.shared();
    // SAFETY: payload came from `alloc` for this same pool.
    let item = unsafe {
        let base = payload.as_ptr().cast::<u8>().sub(shared.payload_offset);
        NonNull::new_unchecked(base)
    };

    #[cfg(debug_assertions)]
    // SAFETY: red zones were stamped when the item was handed out.
    unsafe {
        verify_on_free(shared, desc, item);
    }

    let returned = T::try_with_local(|cache| cache.put(shared, RawItem(item)));
    if returned.is_none() {
        // The thread's cache is already torn down; go straight to the
        // global pool.
        let mut state = shared.lock_state();
        state.free.push_back(RawItem(item));
        state.stats.held_by_threads = state.stats.held_by_threads.saturating_sub(1);
    }
}

/// Owning handle to a pooled item. Dropping it returns the slot to the
/// current thread's free list.
pub struct PoolBox<T: Pooled> {
    ptr: NonNull<T>,
}

// SAFETY: the handle owns the item exclusively; `T: Send` is required by the
// `Pooled` bound, and the raw storage has no thread affinity.
unsafe impl<T: Pooled> Send for PoolBox<T> {}
// SAFETY: shared access to the item is shared access to `T` plus its raw
// extra bytes.
unsafe impl<T: Pooled + Sync> Sync for PoolBox<T> {}

impl<T: Pooled> PoolBox<T> {
    /// The raw extra bytes that follow `T` in the payload (empty unless the
    /// type registered an `extra` size).
    pub fn extra(&self) -> &[u8] {
        let shared = T::descriptor().shared();
        let len = shared.total_size - mem::size_of::<T>();
        // SAFETY: the payload spans total_size bytes starting at the `T`.
        unsafe {
            let p = self.ptr.as_ptr().cast::<u8>().add(mem::size_of::<T>());
            std::slice::from_raw_parts(p, len)
        }
    }

    /// Mutable access to the extra bytes.
    pub fn extra_mut(&mut self) -> &mut [u8] {
        let shared = T::descriptor().shared();
        let len = shared.total_size - mem::size_of::<T>();
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe {
            let p = self.ptr.as_ptr().cast::<u8>().add(mem::size_of::<T>());
            std::slice::from_raw_parts_mut(p, len)
        }
    }

    /// Leaks the item out of the owning handle.
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    /// Rebuilds a handle from [`Self::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` of the same pool and must not be in
    /// use by any other handle.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }
}

impl<T: Pooled> Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the handle owns a live, initialized item.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Pooled> DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, plus exclusivity from `&mut self`.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: Pooled> Drop for PoolBox<T> {
    fn drop(&mut self) {
        // SAFETY: the value is live and dropped exactly once here.
        unsafe { ptr::drop_in_place(self.ptr.as_ptr()) };
        dealloc_raw(self.ptr);
    }
}

impl<T: Pooled + std::fmt::Debug> std::fmt::Debug for PoolBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

/// Snapshot of a type's counters.
pub fn stats<T: Pooled>() -> AllocStats {
    T::descriptor().stats_snapshot().1
}

/// Current length of a type's global free list.
pub fn global_free_len<T: Pooled>() -> usize {
    T::descriptor().stats_snapshot().2
}

/// Declares a type as pooled: generates its static descriptor and the
/// per-thread cache binding.
///
/// ```ignore
/// pool_type!(Frame, "frame");
/// pool_type!(Buffer, "buffer", extra = buffer_capacity);
/// pool_type!(Delivery, "delivery", config = AllocConfig::new(32, 64, 0));
/// ```
#[macro_export]
macro_rules! pool_type {
    ($T:ty, $name:expr) => {
        $crate::pool_type!(@imp $T, $name, ::core::option::Option::None, ::core::option::Option::None);
    };
    ($T:ty, $name:expr, extra = $extra:expr) => {
        $crate::pool_type!(@imp $T, $name,
            ::core::option::Option::Some($extra as fn() -> usize),
            ::core::option::Option::None);
    };
    ($T:ty, $name:expr, config = $config:expr) => {
        $crate::pool_type!(@imp $T, $name,
            ::core::option::Option::None,
            ::core::option::Option::Some($config));
    };
    ($T:ty, $name:expr, extra = $extra:expr, config = $config:expr) => {
        $crate::pool_type!(@imp $T, $name,
            ::core::option::Option::Some($extra as fn() -> usize),
            ::core::option::Option::Some($config));
    };
    (@imp $T:ty, $name:expr, $extra:expr, $config:expr) => {
        const _: () = {
            static DESC: $crate::TypeDesc = $crate::TypeDesc::new(
                $name,
                ::core::mem::size_of::<$T>(),
                ::core::mem::align_of::<$T>(),
                $extra,
                $config,
            );

            ::std::thread_local! {
                static LOCAL: $crate::LocalCache = $crate::LocalCache::new(&DESC);
            }

            // SAFETY: descriptor and thread-local cache are generated
            // together and are unique to this type.
            unsafe impl $crate::Pooled for $T {
                fn descriptor() -> &'static $crate::TypeDesc {
                    &DESC
                }

                fn with_local<R>(f: impl ::core::ops::FnOnce(&$crate::LocalCache) -> R) -> R {
                    LOCAL.with(f)
                }

                fn try_with_local<R>(
                    f: impl ::core::ops::FnOnce(&$crate::LocalCache) -> R,
                ) -> ::core::option::Option<R> {
                    LOCAL.try_with(f).ok()
                }
            }
        };
    };
}
