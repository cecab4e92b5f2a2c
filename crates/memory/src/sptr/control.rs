//! Control header shared by strong and weak handles
//!
//! One allocation holds the header followed by the value:
//!
//! ```text
//! | strong | weak | drop_value | value | allocator | pad | T |
//! ^ block start                                           ^ value (aligned for T)
//! ```
//!
//! Every strong handle also owns one weak reference, so the allocation is
//! returned when `weak` reaches zero and the value is dropped when `strong`
//! does.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering, fence};

#[cfg(feature = "logging")]
use tracing::trace;

use crate::allocator::{AllocError, AllocResult, Allocator};
use crate::utils::{ALIGNMENT, align_up};

pub(crate) struct ControlHeader<'a> {
    pub(crate) strong: AtomicUsize,
    pub(crate) weak: AtomicUsize,
    /// Drops the value in place, typed for the original `T`.
    drop_value: unsafe fn(*mut u8),
    /// Thin pointer to the value, valid whatever handle type points at it.
    value: *mut u8,
    allocator: &'a (dyn Allocator + Sync + 'a),
}

unsafe fn drop_erased<T>(value: *mut u8) {
    // SAFETY: `value` points at the live T written by `ControlHeader::create`.
    unsafe { ptr::drop_in_place(value.cast::<T>()) }
}

impl<'a> ControlHeader<'a> {
    /// Allocates header + value in one block and moves `value` in.
    ///
    /// Counts start at `strong = 1, weak = 1`.
    pub(crate) fn create<T>(
        allocator: &'a (dyn Allocator + Sync + 'a),
        value: T,
    ) -> AllocResult<(NonNull<Self>, NonNull<T>)> {
        let header_size = core::mem::size_of::<Self>();
        let layout = Layout::new::<T>();
        // Blocks are ALIGNMENT-aligned; stricter types need room to shift.
        let slack = layout.align().saturating_sub(ALIGNMENT);
        let total = header_size
            .checked_add(slack)
            .and_then(|n| n.checked_add(layout.size()))
            .ok_or_else(|| AllocError::size_overflow("shared pointer allocation"))?;

        let block = allocator.try_allocate(total)?;
        let base = block.as_ptr();
        let offset = align_up(base as usize + header_size, layout.align()) - base as usize;

        // SAFETY: the block is ours, ALIGNMENT-aligned (enough for the
        // header) and `offset + size_of::<T>() <= total`.
        unsafe {
            let value_ptr = base.add(offset);
            value_ptr.cast::<T>().write(value);

            let header = base.cast::<Self>();
            header.write(Self {
                strong: AtomicUsize::new(1),
                weak: AtomicUsize::new(1),
                drop_value: drop_erased::<T>,
                value: value_ptr,
                allocator,
            });
            Ok((
                NonNull::new_unchecked(header),
                NonNull::new_unchecked(value_ptr.cast::<T>()),
            ))
        }
    }

    /// Address of the value, for identity checks after a coercion.
    pub(crate) fn value_addr(&self) -> *mut u8 {
        self.value
    }

    /// Drops the last strong reference's value.
    ///
    /// # Safety
    ///
    /// `strong` has just reached zero; called exactly once.
    pub(crate) unsafe fn drop_value(&self) {
        fence(Ordering::Acquire);
        // SAFETY: forwarded to the caller.
        unsafe { (self.drop_value)(self.value) }
    }

    /// Releases one weak reference, returning the block on the last one.
    ///
    /// # Safety
    ///
    /// The caller owns one weak reference and gives it up; `header` must not
    /// be used afterwards.
    pub(crate) unsafe fn release_weak(header: NonNull<Self>) {
        // SAFETY: the caller's weak reference keeps the header alive until
        // the decrement.
        unsafe {
            if header.as_ref().weak.fetch_sub(1, Ordering::Release) != 1 {
                return;
            }
            fence(Ordering::Acquire);
            let allocator = header.as_ref().allocator;
            let released = allocator.deallocate_ptr(header.as_ptr().cast());
            debug_assert!(released, "shared pointer block not owned by its allocator");
            #[cfg(feature = "logging")]
            trace!(ptr = ?header.as_ptr(), "shared pointer block released");
        }
    }
}
