//! Reference-counted handles living in a caller-chosen allocator
//!
//! [`Sptr`] and [`Wptr`] work like `Arc` and `Weak`, except that the
//! counters and the value share one block taken from any [`Allocator`]
//! (a pool, a free list, a linear arena) instead of the global heap.
//!
//! ```
//! use carve_memory::allocator::ExplicitListAllocator;
//! use carve_memory::sptr::{Sptr, create_sptr};
//!
//! let alloc = ExplicitListAllocator::new(4096)?;
//! let config = create_sptr(&alloc, String::from("shared"))?;
//! let observer = Sptr::downgrade(&config);
//!
//! assert_eq!(observer.get_sptr().as_deref().map(String::as_str), Some("shared"));
//! drop(config);
//! assert!(observer.is_expired());
//! # Ok::<(), carve_memory::error::MemoryError>(())
//! ```
//!
//! Counter protocol: increments are relaxed, decrements release; the thread
//! that takes a counter to zero issues an acquire fence before dropping the
//! value or returning the block. Every strong handle holds one weak
//! reference, so a fresh handle reports `strong = 1, weak = 1`.
//!
//! [`Allocator`]: crate::allocator::Allocator

mod control;
mod strong;
mod weak;

pub use strong::{Sptr, create_sptr};
pub use weak::Wptr;
