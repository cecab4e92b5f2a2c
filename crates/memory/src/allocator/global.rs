//! Process-wide allocator for foreign hooks
//!
//! C libraries that accept custom `malloc`/`free` callbacks need a plain
//! function pointer, so the allocator behind them has to live in process-wide
//! state. It is set once with [`register`] and cannot be replaced or removed
//! afterwards; until then every hook fails cleanly.
//!
//! ```
//! use carve_memory::allocator::{ExplicitListAllocator, global};
//!
//! let alloc: &'static ExplicitListAllocator =
//!     Box::leak(Box::new(ExplicitListAllocator::new(64 * 1024).unwrap()));
//! global::register(alloc).unwrap();
//!
//! unsafe {
//!     let p = global::carve_calloc(4, 8);
//!     assert!(!p.is_null());
//!     global::carve_free(p);
//! }
//! ```

use core::ffi::c_void;
use std::sync::OnceLock;

#[cfg(feature = "logging")]
use tracing::{info, warn};

use crate::allocator::{AllocResult, Allocator};
use crate::error::MemoryError;

/// Allocator type the hooks dispatch to.
pub type SharedAllocator = dyn Allocator + Send + Sync;

static REGISTERED: OnceLock<&'static SharedAllocator> = OnceLock::new();

/// Installs the process-wide allocator.
///
/// # Errors
///
/// Returns [`MemoryError::InitializationFailed`] when an allocator is already
/// registered; the existing one stays in place.
pub fn register(allocator: &'static SharedAllocator) -> AllocResult<()> {
    let mut installed = false;
    REGISTERED.get_or_init(|| {
        installed = true;
        allocator
    });

    if installed {
        #[cfg(feature = "logging")]
        info!("process-wide allocator registered");
        Ok(())
    } else {
        #[cfg(feature = "logging")]
        warn!("process-wide allocator already registered, keeping the first one");
        Err(MemoryError::already_initialized("process-wide allocator"))
    }
}

/// The registered allocator, if any.
pub fn registered() -> Option<&'static SharedAllocator> {
    REGISTERED.get().copied()
}

pub fn is_registered() -> bool {
    REGISTERED.get().is_some()
}

/// `malloc` replacement: null on failure, for `size == 0`, or when nothing
/// is registered.
///
/// # Safety
///
/// The result must be released with [`carve_free`] only.
pub unsafe extern "C" fn carve_malloc(size: usize) -> *mut c_void {
    registered().map_or(core::ptr::null_mut(), |alloc| {
        alloc.allocate(size).as_ptr().cast()
    })
}

/// `calloc` replacement: zeroed `count * size` bytes, null on overflow.
///
/// # Safety
///
/// See [`carve_malloc`].
pub unsafe extern "C" fn carve_calloc(count: usize, size: usize) -> *mut c_void {
    let (Some(total), Some(alloc)) = (count.checked_mul(size), registered()) else {
        return core::ptr::null_mut();
    };
    alloc.allocate_zeroed(total).as_ptr().cast()
}

/// `free` replacement; null and foreign pointers are ignored.
///
/// # Safety
///
/// `ptr` must be null or come from [`carve_malloc`]/[`carve_calloc`] and not
/// have been freed.
pub unsafe extern "C" fn carve_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if let Some(alloc) = registered() {
        // SAFETY: forwarded to the caller.
        unsafe { alloc.deallocate_ptr(ptr.cast()) };
    }
}
