//! Weak observer list with reentrant traversal
//!
//! [`WeakList`] stores weak handles in insertion order. It may be mutated
//! from inside its own [`WeakList::for_each`] callback: adds and removes
//! issued while a traversal is active are queued, together with a strong
//! reference to their element, and replayed in call order once the outermost
//! traversal ends. Dead entries are skipped during
//! traversal and swept afterwards.
//!
//! All methods take `&self`; the list is meant to be shared by the callbacks
//! it drives on a single thread.

use crate::handle::WeakHandle;
use crate::scope::Scoped;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Deferred operation; holds the element until it is replayed
enum PendingOp<T: ?Sized> {
    Add(Rc<T>),
    Remove(Rc<T>),
}

/// An ordered, duplicate-free collection of weak handles
pub struct WeakList<T: ?Sized> {
    /// Backing storage, insertion order
    elements: RefCell<Vec<WeakHandle<T>>>,
    /// Nesting depth of active traversals
    depth: Cell<usize>,
    /// Set when a traversal saw a dead entry
    needs_gc: Cell<bool>,
    /// Operations issued during a traversal
    pending: RefCell<Vec<PendingOp<T>>>,
}

impl<T: ?Sized + Scoped> WeakList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            elements: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            needs_gc: Cell::new(false),
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Raw number of entries, including dead ones not yet swept
    pub fn count(&self) -> usize {
        self.elements.borrow().len()
    }

    /// Check whether there are no entries at all
    pub fn is_empty(&self) -> bool {
        self.elements.borrow().is_empty()
    }

    /// Number of entries whose target is still alive
    pub fn live_count(&self) -> usize {
        self.elements.borrow().iter().filter(|h| h.is_alive()).count()
    }

    /// Check whether a traversal is in progress
    pub fn is_traversing(&self) -> bool {
        self.depth.get() > 0
    }

    /// Number of operations waiting for the traversal to end
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Check whether `element` is in the backing storage
    ///
    /// Operations queued by an active traversal are not reflected until it
    /// ends.
    pub fn contains(&self, element: &Rc<T>) -> bool {
        self.index_of(element).is_some()
    }

    fn index_of(&self, element: &Rc<T>) -> Option<usize> {
        self.elements
            .borrow()
            .iter()
            .position(|h| h.points_to(element))
    }

    /// Membership once the pending operations have been applied
    fn will_contain(&self, element: &Rc<T>) -> bool {
        let mut present = self.contains(element);
        for op in self.pending.borrow().iter() {
            match op {
                PendingOp::Add(e) if same(e, element) => present = true,
                PendingOp::Remove(e) if same(e, element) => present = false,
                _ => {}
            }
        }
        present
    }

    /// Add `element`
    ///
    /// Returns false if it is already present. During a traversal the
    /// insertion is deferred; the return value then reports whether it will
    /// take effect.
    pub fn add(&self, element: &Rc<T>) -> bool {
        if self.is_traversing() {
            if self.will_contain(element) {
                return false;
            }
            self.pending
                .borrow_mut()
                .push(PendingOp::Add(Rc::clone(element)));
            true
        } else {
            self.insert(element)
        }
    }

    /// Remove `element`
    ///
    /// Returns false if it is absent. Deferred during a traversal, like
    /// [`WeakList::add`].
    pub fn remove(&self, element: &Rc<T>) -> bool {
        if self.is_traversing() {
            if !self.will_contain(element) {
                return false;
            }
            self.pending
                .borrow_mut()
                .push(PendingOp::Remove(Rc::clone(element)));
            true
        } else {
            self.detach(element)
        }
    }

    /// Remove every live element
    pub fn clear(&self) {
        for element in self.to_vec() {
            self.remove(&element);
        }
        if self.is_traversing() {
            self.needs_gc.set(true);
        } else {
            self.sweep();
        }
    }

    fn insert(&self, element: &Rc<T>) -> bool {
        if self.contains(element) {
            return false;
        }
        self.elements.borrow_mut().push(WeakHandle::new(element));
        Scoped::on_added(Rc::clone(element));
        true
    }

    fn detach(&self, element: &Rc<T>) -> bool {
        let Some(index) = self.index_of(element) else {
            return false;
        };
        self.elements.borrow_mut().remove(index);
        Scoped::on_removed(Rc::clone(element));
        true
    }

    /// Visit every live element in insertion order
    ///
    /// Nested traversals share one depth counter; only the outermost one
    /// replays deferred operations and sweeps.
    pub fn for_each(&self, mut visit: impl FnMut(&Rc<T>)) {
        let _traversal = Traversal::enter(self);
        let mut index = 0;
        loop {
            let target = match self.elements.borrow().get(index) {
                Some(handle) => handle.upgrade(),
                None => break,
            };
            match target {
                Some(element) => visit(&element),
                None => self.needs_gc.set(true),
            }
            index += 1;
        }
    }

    /// Strong references to the live elements, in order
    pub fn to_vec(&self) -> Vec<Rc<T>> {
        self.elements
            .borrow()
            .iter()
            .filter_map(WeakHandle::upgrade)
            .collect()
    }

    /// Sweep dead entries, returning how many were removed
    ///
    /// During a traversal this only requests a sweep for when it ends and
    /// returns 0.
    pub fn collect_garbage(&self) -> usize {
        if self.is_traversing() {
            self.needs_gc.set(true);
            return 0;
        }
        self.sweep()
    }

    fn sweep(&self) -> usize {
        let mut elements = self.elements.borrow_mut();
        let before = elements.len();
        elements.retain(|handle| {
            let alive = handle.is_alive();
            if !alive {
                tracing::debug!(remaining = before, "garbage entry in weak list");
            }
            alive
        });
        before - elements.len()
    }

    fn release(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth > 0 {
            return;
        }
        let ops = std::mem::take(&mut *self.pending.borrow_mut());
        for op in ops {
            match op {
                PendingOp::Add(element) => {
                    self.insert(&element);
                }
                PendingOp::Remove(element) => {
                    self.detach(&element);
                }
            }
        }
        if self.needs_gc.replace(false) {
            self.sweep();
        }
    }
}

fn same<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl<T: ?Sized + Scoped> Default for WeakList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakList")
            .field("count", &self.elements.borrow().len())
            .field("depth", &self.depth.get())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

/// Keeps the depth counter balanced even if a visitor panics
struct Traversal<'a, T: ?Sized + Scoped> {
    list: &'a WeakList<T>,
}

impl<'a, T: ?Sized + Scoped> Traversal<'a, T> {
    fn enter(list: &'a WeakList<T>) -> Self {
        list.depth.set(list.depth.get() + 1);
        Self { list }
    }
}

impl<T: ?Sized + Scoped> Drop for Traversal<'_, T> {
    fn drop(&mut self) {
        self.list.release();
    }
}
