use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use super::Wptr;
use super::control::ControlHeader;
use crate::allocator::{AllocResult, Allocator};

/// Strong handle: keeps the value alive
///
/// Clones share one value. The value is dropped with the last strong handle;
/// the allocation itself is returned once the last [`Wptr`] is gone too.
pub struct Sptr<'a, T: ?Sized> {
    pub(super) header: NonNull<ControlHeader<'a>>,
    pub(super) value: NonNull<T>,
    pub(super) _owns: PhantomData<T>,
}

// SAFETY: the counters are atomic and the allocator reference is Sync; the
// value is shared across threads, so it must be Send + Sync itself.
unsafe impl<T: ?Sized + Send + Sync> Send for Sptr<'_, T> {}
// SAFETY: see Send.
unsafe impl<T: ?Sized + Send + Sync> Sync for Sptr<'_, T> {}

impl<'a, T> Sptr<'a, T> {
    /// Moves `value` into one allocation from `allocator` together with its
    /// counters.
    pub fn new_in<A: Allocator + Sync>(value: T, allocator: &'a A) -> AllocResult<Self> {
        let (header, value) = ControlHeader::create(allocator, value)?;
        Ok(Self {
            header,
            value,
            _owns: PhantomData,
        })
    }
}

impl<'a, T: ?Sized> Sptr<'a, T> {
    #[inline]
    pub(super) fn header(&self) -> &ControlHeader<'a> {
        // SAFETY: a strong handle keeps the header alive.
        unsafe { self.header.as_ref() }
    }

    pub fn strong_count(this: &Self) -> usize {
        this.header().strong.load(Ordering::Acquire)
    }

    pub fn weak_count(this: &Self) -> usize {
        this.header().weak.load(Ordering::Acquire)
    }

    /// True if both handles share one allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.header == other.header
    }

    pub fn as_ptr(this: &Self) -> *const T {
        this.value.as_ptr()
    }

    pub fn downgrade(this: &Self) -> Wptr<'a, T> {
        this.header().weak.fetch_add(1, Ordering::Relaxed);
        Wptr {
            header: this.header,
            value: this.value,
        }
    }

    /// Mutable access when this is the only handle of any kind.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let header = this.header();
        if header.strong.load(Ordering::Acquire) == 1 && header.weak.load(Ordering::Acquire) == 1 {
            // SAFETY: no other handle exists, so nothing else can reach the value.
            Some(unsafe { this.value.as_mut() })
        } else {
            None
        }
    }

    /// Converts to a handle on a related type without reallocating.
    ///
    /// `f` typically unsizes (`|v| v as &dyn Trait`, `|a| &a[..]`). It must
    /// return the value itself; any other reference gives the handle back
    /// unchanged as `Err`.
    pub fn coerce<U: ?Sized>(self, f: for<'x> fn(&'x T) -> &'x U) -> Result<Sptr<'a, U>, Self> {
        let converted = NonNull::from(f(&*self));
        if !ptr::addr_eq(converted.as_ptr(), self.header().value_addr()) {
            return Err(self);
        }
        let header = self.header;
        core::mem::forget(self);
        Ok(Sptr {
            header,
            value: converted,
            _owns: PhantomData,
        })
    }
}

/// Allocates `value` behind a fresh strong handle; see [`Sptr::new_in`].
pub fn create_sptr<'a, A, T>(allocator: &'a A, value: T) -> AllocResult<Sptr<'a, T>>
where
    A: Allocator + Sync,
{
    Sptr::new_in(value, allocator)
}

impl<T: ?Sized> Clone for Sptr<'_, T> {
    fn clone(&self) -> Self {
        let header = self.header();
        header.strong.fetch_add(1, Ordering::Relaxed);
        header.weak.fetch_add(1, Ordering::Relaxed);
        Self {
            header: self.header,
            value: self.value,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Sptr<'_, T> {
    fn drop(&mut self) {
        // SAFETY: this handle owns one strong and one weak reference and
        // gives both up here.
        unsafe {
            if self.header().strong.fetch_sub(1, Ordering::Release) == 1 {
                self.header().drop_value();
            }
            ControlHeader::release_weak(self.header);
        }
    }
}

impl<T: ?Sized> Deref for Sptr<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the value lives while any strong handle does.
        unsafe { self.value.as_ref() }
    }
}

impl<T: ?Sized> AsRef<T> for Sptr<'_, T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Sptr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Sptr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for Sptr<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: ?Sized + Eq> Eq for Sptr<'_, T> {}
