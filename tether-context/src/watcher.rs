//! Event watchers
//!
//! A watcher hears every event an aspect produces, regardless of key.
//! Channels and request handlers keep their watchers in a [`WatcherList`].

use crate::aspect::Aspect;
use std::rc::Rc;
use tether_weak::{Owner, Scoped, Subscription, WeakList};

/// Receives every event of type `E` from an aspect
pub trait EventWatcher<E: ?Sized>: Scoped {
    fn on_event(&self, aspect: &Aspect, event: &E);
}

impl<E: ?Sized, F> EventWatcher<E> for Subscription<F>
where
    F: Fn(&Aspect, &E) + 'static,
{
    fn on_event(&self, aspect: &Aspect, event: &E) {
        self.when_owner_alive(|body| body(aspect, event));
    }
}

/// Create a closure watcher owned by `owner`
pub fn event_watcher<E, O, F>(owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
where
    E: ?Sized,
    O: Owner + 'static,
    F: Fn(&Aspect, &E) + 'static,
{
    Subscription::with_kind(owner, "EventWatcher", f)
}

/// Weak list of watchers for one event type
pub struct WatcherList<E: ?Sized + 'static> {
    list: WeakList<dyn EventWatcher<E>>,
}

impl<E: ?Sized + 'static> WatcherList<E> {
    pub fn new() -> Self {
        Self {
            list: WeakList::new(),
        }
    }

    pub fn add<W: EventWatcher<E> + 'static>(&self, watcher: &Rc<W>) -> bool {
        let watcher: Rc<dyn EventWatcher<E>> = watcher.clone();
        self.list.add(&watcher)
    }

    pub fn remove<W: EventWatcher<E> + 'static>(&self, watcher: &Rc<W>) -> bool {
        let watcher: Rc<dyn EventWatcher<E>> = watcher.clone();
        self.list.remove(&watcher)
    }

    /// Raw count, including watchers not yet swept
    pub fn count(&self) -> usize {
        self.list.count()
    }

    pub fn notify(&self, aspect: &Aspect, event: &E) {
        self.list.for_each(|watcher| watcher.on_event(aspect, event));
    }

    pub fn collect_garbage(&self) -> usize {
        self.list.collect_garbage()
    }
}

impl<E: ?Sized + 'static> Default for WatcherList<E> {
    fn default() -> Self {
        Self::new()
    }
}
