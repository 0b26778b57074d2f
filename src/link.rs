//! Atomic links between published nodes
//!
//! This module provides `Link<T>` and `Protected<'s, T>` for the
//! publish/observe protocol: the single writer publishes a fully
//! initialized node with a release store, and readers traverse with
//! acquire loads that are tied to a live read section.

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::reader::ReadSection;

/// An atomic optional pointer to a node.
///
/// `Link` is the only channel through which list nodes become reachable.
/// Read-side loads take a [`ReadSection`] and return a [`Protected`]
/// pointer that cannot outlive it; the section is what keeps the pointee
/// alive until the reclaimer has proven a grace period.
///
/// The single writer traverses with [`load_raw`](Self::load_raw) and
/// publishes with [`store`](Self::store); the protocol never contends on a
/// link, so there is no compare-exchange surface.
pub struct Link<T> {
    ptr: AtomicPtr<T>,
}

unsafe impl<T: Send + Sync> Send for Link<T> {}
unsafe impl<T: Send + Sync> Sync for Link<T> {}

impl<T> Link<T> {
    /// Creates a link to `ptr`.
    #[inline]
    pub fn new(ptr: *mut T) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr),
        }
    }

    /// Creates an empty link.
    #[inline]
    pub fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Loads the link inside a read section.
    ///
    /// Use `Ordering::Acquire` when traversing toward data published by the
    /// writer; the acquire pairs with the release in the publishing store,
    /// so a reader that observes a node also observes its initialized
    /// fields.
    #[inline]
    pub fn load<'s>(&self, order: Ordering, _section: &'s ReadSection<'_>) -> Protected<'s, T> {
        Protected {
            data: self.ptr.load(order),
            _section: PhantomData,
        }
    }

    /// Loads the link without a read section.
    ///
    /// For the single writer's own traversal and for teardown, where the
    /// caller owns the liveness argument instead of a section. Dereferencing
    /// the result is as unsafe as any raw pointer.
    #[inline]
    pub fn load_raw(&self, order: Ordering) -> *mut T {
        self.ptr.load(order)
    }

    /// Stores `ptr` into the link.
    ///
    /// Publication of a freshly allocated node must use
    /// `Ordering::Release`; unlink stores may be relaxed because the
    /// bypassed node stays valid until a grace period has elapsed.
    #[inline]
    pub fn store(&self, ptr: *mut T, order: Ordering) {
        self.ptr.store(ptr, order);
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// A pointer observed inside a read section.
///
/// The `'s` lifetime ties the pointer to the [`ReadSection`] it was loaded
/// in: once the section ends, the pointer is gone, which is exactly the
/// window in which the reclamation protocol keeps the pointee alive.
pub struct Protected<'s, T> {
    data: *mut T,
    _section: PhantomData<&'s ReadSection<'s>>,
}

impl<'s, T> Protected<'s, T> {
    /// Wraps a raw pointer as if it had been loaded in the section.
    ///
    /// # Safety
    ///
    /// The caller must ensure the pointee stays valid for the rest of the
    /// section.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            data: ptr,
            _section: PhantomData,
        }
    }

    /// Returns the raw pointer.
    #[inline]
    pub fn as_raw(&self) -> *mut T {
        self.data
    }

    /// Returns true if the pointer is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Converts to an optional reference.
    ///
    /// # Safety
    ///
    /// The pointer must be properly aligned and, if non-null, point to a
    /// node reachable through the protocol (published before the load, not
    /// yet reclaimed).
    #[inline]
    pub unsafe fn as_ref(&self) -> Option<&'s T> {
        if self.is_null() {
            None
        } else {
            // SAFETY: caller guarantees the pointee outlives the section.
            unsafe { Some(&*self.data) }
        }
    }

    /// Converts to a reference without the null check.
    ///
    /// # Safety
    ///
    /// As [`as_ref`](Self::as_ref), and the pointer must not be null.
    #[inline]
    pub unsafe fn deref(&self) -> &'s T {
        // SAFETY: caller guarantees non-null and live for the section.
        unsafe { &*self.data }
    }
}

impl<'s, T> Clone for Protected<'s, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'s, T> Copy for Protected<'s, T> {}

impl<'s, T> PartialEq for Protected<'s, T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'s, T> Eq for Protected<'s, T> {}

impl<'s, T> core::fmt::Debug for Protected<'s, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Protected({:p})", self.data)
    }
}
