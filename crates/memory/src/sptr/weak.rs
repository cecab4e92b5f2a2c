use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use super::Sptr;
use super::control::ControlHeader;

/// Weak handle: keeps the allocation, not the value
///
/// Upgrade with [`Wptr::get_sptr`] while any strong handle exists.
pub struct Wptr<'a, T: ?Sized> {
    pub(super) header: NonNull<ControlHeader<'a>>,
    pub(super) value: NonNull<T>,
}

// SAFETY: a weak handle can be upgraded on another thread, so it needs the
// same bounds as a strong one.
unsafe impl<T: ?Sized + Send + Sync> Send for Wptr<'_, T> {}
// SAFETY: see Send.
unsafe impl<T: ?Sized + Send + Sync> Sync for Wptr<'_, T> {}

impl<'a, T: ?Sized> Wptr<'a, T> {
    #[inline]
    fn header(&self) -> &ControlHeader<'a> {
        // SAFETY: a weak handle keeps the header alive.
        unsafe { self.header.as_ref() }
    }

    /// True once the last strong handle is gone.
    pub fn is_expired(&self) -> bool {
        self.strong_count() == 0
    }

    pub fn strong_count(&self) -> usize {
        self.header().strong.load(Ordering::Acquire)
    }

    pub fn weak_count(&self) -> usize {
        self.header().weak.load(Ordering::Acquire)
    }

    /// A new strong handle, or `None` if the value is already gone.
    pub fn get_sptr(&self) -> Option<Sptr<'a, T>> {
        let header = self.header();
        let mut strong = header.strong.load(Ordering::Relaxed);
        loop {
            if strong == 0 {
                return None;
            }
            match header.strong.compare_exchange_weak(
                strong,
                strong + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => strong = actual,
            }
        }
        // The new strong handle owns a weak reference of its own.
        header.weak.fetch_add(1, Ordering::Relaxed);
        Some(Sptr {
            header: self.header,
            value: self.value,
            _owns: PhantomData,
        })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.header == other.header
    }
}

impl<T: ?Sized> Clone for Wptr<'_, T> {
    fn clone(&self) -> Self {
        self.header().weak.fetch_add(1, Ordering::Relaxed);
        Self {
            header: self.header,
            value: self.value,
        }
    }
}

impl<T: ?Sized> Drop for Wptr<'_, T> {
    fn drop(&mut self) {
        // SAFETY: this handle owns one weak reference and gives it up.
        unsafe { ControlHeader::release_weak(self.header) }
    }
}

impl<T: ?Sized> fmt::Debug for Wptr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Wptr)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{MemoryUsage, RedBlackTreeAllocator};

    #[test]
    fn expires_with_last_strong() {
        let alloc = RedBlackTreeAllocator::new(1024).expect("allocator");
        let strong = Sptr::new_in(vec![1, 2, 3], &alloc).expect("sptr");
        let weak = Sptr::downgrade(&strong);
        assert_eq!((weak.strong_count(), weak.weak_count()), (1, 2));
        assert!(!weak.is_expired());

        let upgraded = weak.get_sptr().expect("alive");
        assert_eq!(upgraded.len(), 3);
        assert_eq!(weak.weak_count(), 3);
        drop(upgraded);
        drop(strong);

        assert!(weak.is_expired());
        assert!(weak.get_sptr().is_none());
        // The block survives until the last weak handle goes.
        assert!(alloc.used_memory() > 0);
        drop(weak);
        assert_eq!(alloc.used_memory(), 0);
    }

    #[test]
    fn weak_clones_share_the_block() {
        let alloc = RedBlackTreeAllocator::new(1024).expect("allocator");
        let strong = Sptr::new_in(5u8, &alloc).expect("sptr");
        let a = Sptr::downgrade(&strong);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(Sptr::weak_count(&strong), 3);
        drop((a, b));
        assert_eq!(Sptr::weak_count(&strong), 1);
    }
}
