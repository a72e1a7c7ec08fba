//! Owner-scoped subscriptions
//!
//! Observer lists only hold weak handles, so something else has to keep a
//! registered callback alive. That something is its owner: when a
//! [`Subscription`] is inserted into a [`WeakList`](crate::WeakList) it
//! attaches itself to its owner, and when it is removed it detaches. Once the
//! owner is dropped its subscriptions go with it and the lists that still
//! reference them find dead entries to sweep.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A value that can live in a [`WeakList`](crate::WeakList)
///
/// The hooks fire when the element actually enters or leaves a list's
/// backing storage, which for operations issued during a traversal is when
/// the outermost traversal ends.
pub trait Scoped {
    /// Name used in logs
    fn scope_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_string()
    }

    /// Called after the element was inserted into a list
    fn on_added(self: Rc<Self>) {}

    /// Called after the element was removed from a list
    fn on_removed(self: Rc<Self>) {}
}

/// Something that keeps subscriptions alive on their behalf
pub trait Owner {
    /// Start holding `subscription`
    fn attach(&self, subscription: Rc<dyn Scoped>);

    /// Stop holding `subscription`
    fn detach(&self, subscription: &Rc<dyn Scoped>);
}

/// The default [`Owner`]: a list of strong references
///
/// Components embed an `Rc<ScopedOwner>` and hand it to every subscription
/// they create. Dropping the owner releases them all.
#[derive(Default)]
pub struct ScopedOwner {
    subscriptions: RefCell<Vec<Rc<dyn Scoped>>>,
}

impl ScopedOwner {
    /// Create a new owner
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of subscriptions currently held
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    /// Check whether `subscription` is held by this owner
    pub fn holds(&self, subscription: &Rc<dyn Scoped>) -> bool {
        self.subscriptions
            .borrow()
            .iter()
            .any(|held| same_allocation(held, subscription))
    }

    /// Names of the held subscriptions
    pub fn subscription_names(&self) -> Vec<String> {
        self.subscriptions
            .borrow()
            .iter()
            .map(|held| held.scope_name())
            .collect()
    }

    /// Release every held subscription
    ///
    /// Lists referencing them will find dead entries on their next sweep.
    pub fn release_all(&self) {
        let released = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(released);
    }
}

impl Owner for ScopedOwner {
    fn attach(&self, subscription: Rc<dyn Scoped>) {
        if !self.holds(&subscription) {
            self.subscriptions.borrow_mut().push(subscription);
        }
    }

    fn detach(&self, subscription: &Rc<dyn Scoped>) {
        // Drop outside the borrow: a subscription's captures may reach back here.
        let released = {
            let mut held = self.subscriptions.borrow_mut();
            held.iter()
                .position(|h| same_allocation(h, subscription))
                .map(|index| held.remove(index))
        };
        drop(released);
    }
}

impl fmt::Debug for ScopedOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedOwner")
            .field("subscriptions", &self.subscription_names())
            .finish()
    }
}

fn same_allocation(a: &Rc<dyn Scoped>, b: &Rc<dyn Scoped>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A callback that belongs to an owner
///
/// The subscription holds only a weak handle to its owner. Its firing role
/// (bus subscriber, event watcher, ...) is provided by trait impls in the
/// crates that define those roles; all of them should go through
/// [`Subscription::when_owner_alive`] so a subscription whose owner just died
/// silently does nothing until its list sweeps it.
pub struct Subscription<F> {
    owner: Weak<dyn Owner>,
    kind: &'static str,
    body: F,
}

impl<F> Subscription<F> {
    /// Create a subscription owned by `owner`
    pub fn new<O: Owner + 'static>(owner: &Rc<O>, body: F) -> Rc<Self> {
        Self::with_kind(owner, "Subscription", body)
    }

    /// Create a subscription with a custom kind name for logs
    pub fn with_kind<O: Owner + 'static>(owner: &Rc<O>, kind: &'static str, body: F) -> Rc<Self> {
        let owner: Rc<dyn Owner> = owner.clone();
        Rc::new(Self {
            owner: Rc::downgrade(&owner),
            kind,
            body,
        })
    }

    /// Check whether the owner is still alive
    pub fn is_owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    /// Kind name, prefixed with `!` once the owner is gone
    pub fn name(&self) -> String {
        if self.is_owner_alive() {
            self.kind.to_string()
        } else {
            format!("!{}", self.kind)
        }
    }

    /// Run `fire` with the body if the owner is alive
    pub fn when_owner_alive(&self, fire: impl FnOnce(&F)) {
        if self.is_owner_alive() {
            fire(&self.body);
        }
    }
}

impl<F: 'static> Scoped for Subscription<F> {
    fn scope_name(&self) -> String {
        self.name()
    }

    fn on_added(self: Rc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.attach(self);
        }
    }

    fn on_removed(self: Rc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            let this: Rc<dyn Scoped> = self;
            owner.detach(&this);
        }
    }
}

impl<F> fmt::Debug for Subscription<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name())
            .finish()
    }
}
