//! Heap accounting for per-run memory ceilings
//!
//! The interpreter runs in-process, so an address-space rlimit would apply to
//! the whole host and an allocation failure aborts a Rust process instead of
//! raising. Instead, a counting global allocator tracks live bytes per thread
//! and the runner arms a [`Budget`] on the worker thread. An allocation that
//! takes the thread past its budget latches an over-budget flag, so a large
//! allocation made between two of the watchdog's memory checks is still
//! caught when the run ends. Those checks call [`exceeded`] from inside the
//! interpreter and raise `MemoryError` in the running code.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use tracing::warn;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static MISSING_WARNING: Once = Once::new();

thread_local! {
    static LIVE_BYTES: Cell<i64> = const { Cell::new(0) };
    static ARMED: Cell<Option<(i64, u64)>> = const { Cell::new(None) };
    static OVER_BUDGET: Cell<bool> = const { Cell::new(false) };
}

/// Global allocator wrapper that counts live heap bytes per thread
///
/// The `pysandbox-mcp` binary installs it; library users either enable the
/// `tracking-allocator` feature or register it in their own binary:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: pysandbox::sandbox::memory::TrackingAllocator =
///     pysandbox::sandbox::memory::TrackingAllocator;
/// ```
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            record(layout.size() as i64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            record(layout.size() as i64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        record(-(layout.size() as i64));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record(new_size as i64 - layout.size() as i64);
        }
        new_ptr
    }
}

// Must not allocate: runs inside the allocator.
#[inline]
fn record(delta: i64) {
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
    let live = LIVE_BYTES
        .try_with(|live| {
            let now = live.get() + delta;
            live.set(now);
            now
        })
        .unwrap_or(0);

    if delta > 0 {
        if let Ok(Some((baseline, limit))) = ARMED.try_with(Cell::get) {
            if live.saturating_sub(baseline) > limit as i64 {
                let _ = OVER_BUDGET.try_with(|over| over.set(true));
            }
        }
    }
}

/// Whether the counting allocator is the process's global allocator
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

/// Net bytes allocated (minus freed) by the current thread
pub fn thread_live_bytes() -> i64 {
    LIVE_BYTES.try_with(|live| live.get()).unwrap_or(0)
}

/// An armed memory ceiling for the current thread, disarmed on drop
#[derive(Debug)]
pub struct Budget {
    limit_bytes: u64,
}

impl Budget {
    /// Arm a ceiling of `limit_bytes` above the thread's current usage.
    ///
    /// Returns `None` (after warning once per process) when the counting
    /// allocator is not installed; execution then proceeds unbounded.
    pub fn arm(limit_bytes: u64) -> Option<Budget> {
        if !is_installed() {
            MISSING_WARNING.call_once(|| {
                warn!(
                    "Tracking allocator not installed; memory limits are not enforced \
                     (enable the `tracking-allocator` feature)"
                );
            });
            return None;
        }

        let baseline = thread_live_bytes();
        OVER_BUDGET.with(|over| over.set(false));
        ARMED.with(|armed| armed.set(Some((baseline, limit_bytes))));
        Some(Budget { limit_bytes })
    }

    /// The configured ceiling in bytes
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }
}

impl Drop for Budget {
    fn drop(&mut self) {
        let _ = ARMED.try_with(|armed| armed.set(None));
        let _ = OVER_BUDGET.try_with(|over| over.set(false));
    }
}

/// If the current thread has an armed budget and went past it at any point
/// since it was armed, the limit. Freeing memory afterwards does not clear it.
pub fn exceeded() -> Option<u64> {
    let (baseline, limit) = ARMED.try_with(Cell::get).ok().flatten()?;
    let latched = OVER_BUDGET.try_with(Cell::get).unwrap_or(false);
    let grown = thread_live_bytes().saturating_sub(baseline);
    (latched || grown > limit as i64).then_some(limit)
}
