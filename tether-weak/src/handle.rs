//! Non-owning handles
//!
//! A [`WeakHandle`] wraps an `rc::Weak` and adds identity comparison against
//! live values, which is what observer lists need to detect duplicates.

use std::fmt;
use std::rc::{Rc, Weak};

/// A non-owning reference to a value held in an `Rc`
///
/// Resolving a handle never extends the target's lifetime beyond the
/// returned `Rc`. Identity is the address of the shared allocation, which
/// stays reserved while any handle to it exists, so a dead handle can never
/// alias a newer value.
pub struct WeakHandle<T: ?Sized> {
    inner: Weak<T>,
}

impl<T: ?Sized> WeakHandle<T> {
    /// Create a handle pointing at `target`
    pub fn new(target: &Rc<T>) -> Self {
        Self {
            inner: Rc::downgrade(target),
        }
    }

    /// Check whether the target is still alive
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Resolve the handle, or `None` if the target is gone
    pub fn upgrade(&self) -> Option<Rc<T>> {
        self.inner.upgrade()
    }

    /// Check whether this handle refers to `target`
    pub fn points_to(&self, target: &Rc<T>) -> bool {
        addr(self.inner.as_ptr()) == addr(Rc::as_ptr(target))
    }

    /// Check whether two handles refer to the same allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        addr(self.inner.as_ptr()) == addr(other.inner.as_ptr())
    }
}

fn addr<T: ?Sized>(ptr: *const T) -> *const () {
    ptr as *const ()
}

impl<T: ?Sized> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
