//! Message bus
//!
//! A [`MessageBus`] is scoped to one message type. Each message value is its
//! own key: subscribers register for a value, watchers hear every value.
//! Per value the bus tracks a use count, an optional [`Token`] and whether it
//! was ever published.
//!
//! A token is bound to a message the first time one is presented for it and
//! stays bound for the life of the bus. Afterwards publishing or clearing
//! with a different token is rejected; presenting no token is always allowed.

use crate::aspect::Aspect;
use crate::error::{ContextError, ContextResult};
use crate::log::LogSink;
use crate::types::{AspectId, LogId, Token};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use tether_weak::{Owner, PubSub, Scoped, Subscription, WeakHandle};

/// Receives messages from a bus
pub trait BusSub<M>: Scoped {
    fn on_msg(&self, bus: &MessageBus<M>, msg: &M);
}

impl<M, F> BusSub<M> for Subscription<F>
where
    F: Fn(&MessageBus<M>, &M) + 'static,
{
    fn on_msg(&self, bus: &MessageBus<M>, msg: &M) {
        self.when_owner_alive(|body| body(bus, msg));
    }
}

/// Create a closure subscriber owned by `owner`
pub fn bus_sub<M, O, F>(owner: &Rc<O>, kind: &'static str, f: F) -> Rc<Subscription<F>>
where
    O: Owner + 'static,
    F: Fn(&MessageBus<M>, &M) + 'static,
{
    Subscription::with_kind(owner, kind, f)
}

/// Record of a publication
#[derive(Debug, Clone)]
pub struct MessageLog<M> {
    pub bus: AspectId,
    pub identity: LogId,
    pub time: DateTime<Utc>,
    pub message: M,
}

impl<M> MessageLog<M> {
    fn new(bus: AspectId, message: M) -> Self {
        Self {
            bus,
            identity: LogId::next(),
            time: Utc::now(),
            message,
        }
    }
}

pub struct MessageBus<M> {
    aspect: Aspect,
    last: RefCell<Option<MessageLog<M>>>,
    /// Every message ever published, first publication order
    known: RefCell<Vec<M>>,
    known_set: RefCell<HashSet<M>>,
    counts: RefCell<HashMap<M, usize>>,
    tokens: RefCell<HashMap<M, Token>>,
    subs: PubSub<M, dyn BusSub<M>>,
}

impl<M> MessageBus<M>
where
    M: Hash + Eq + Clone + fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_aspect(Aspect::new(name))
    }

    pub fn with_sink(name: impl Into<String>, sink: Rc<dyn LogSink>) -> Self {
        Self::with_aspect(Aspect::with_sink(name, sink))
    }

    pub fn with_aspect(aspect: Aspect) -> Self {
        Self {
            aspect,
            last: RefCell::new(None),
            known: RefCell::new(Vec::new()),
            known_set: RefCell::new(HashSet::new()),
            counts: RefCell::new(HashMap::new()),
            tokens: RefCell::new(HashMap::new()),
            subs: PubSub::new(),
        }
    }

    pub fn aspect(&self) -> &Aspect {
        &self.aspect
    }

    pub fn revision(&self) -> u64 {
        self.aspect.revision()
    }

    fn check_token(&self, msg: &M, token: Option<&Token>) -> ContextResult<()> {
        let Some(token) = token else {
            return Ok(());
        };
        let bound = self.tokens.borrow().get(msg).cloned();
        match bound {
            Some(bound) if bound != *token => {
                let err = ContextError::TokenMismatch {
                    message: format!("{:?}", msg),
                    bound,
                    given: token.clone(),
                };
                self.aspect.error(format_args!("{}", err));
                Err(err)
            }
            Some(_) => Ok(()),
            None => {
                self.tokens.borrow_mut().insert(msg.clone(), token.clone());
                Ok(())
            }
        }
    }

    fn remember(&self, msg: &M) {
        if self.known_set.borrow_mut().insert(msg.clone()) {
            self.known.borrow_mut().push(msg.clone());
        }
    }

    /// Publish `msg`
    ///
    /// Per-message subscribers fire first, then watchers. Rejected with
    /// [`ContextError::TokenMismatch`] when `token` conflicts with the bound
    /// one; nothing changes in that case.
    pub fn publish(&self, msg: M, token: Option<&Token>) -> ContextResult<()> {
        self.check_token(&msg, token)?;
        self.remember(&msg);
        let count = {
            let mut counts = self.counts.borrow_mut();
            let count = counts.entry(msg.clone()).or_insert(0);
            *count += 1;
            *count
        };
        *self.last.borrow_mut() = Some(MessageLog::new(self.aspect.id(), msg.clone()));
        self.aspect.advance_revision();
        if self.aspect.debug_enabled() {
            self.aspect.debug(format_args!(
                "Publish <{}> {:?}: sub_count = {}, msg_count = {}",
                std::any::type_name::<M>(),
                msg,
                self.sub_count(&msg),
                count
            ));
        }
        self.subs.publish(&msg, |sub| sub.on_msg(self, &msg));
        Ok(())
    }

    /// Publish `msg` unless it is currently published
    ///
    /// `is_debug` selects the severity the rejection is logged at.
    pub fn publish_once(&self, msg: M, token: Option<&Token>, is_debug: bool) -> ContextResult<()> {
        if self.is_published(&msg) {
            let err = ContextError::AlreadyPublished(format!("{:?}", msg));
            self.aspect.error_or_debug(is_debug, format_args!("{}", err));
            return Err(err);
        }
        self.publish(msg, token)
    }

    /// Reset the use count of `msg` to zero
    ///
    /// The message stays known. Same token rules as [`MessageBus::publish`].
    pub fn clear(&self, msg: M, token: Option<&Token>) -> ContextResult<()> {
        self.check_token(&msg, token)?;
        if self.aspect.debug_enabled() {
            self.aspect.debug(format_args!(
                "Clear <{}> {:?}: msg_count = {}",
                std::any::type_name::<M>(),
                msg,
                self.use_count(&msg)
            ));
        }
        self.counts.borrow_mut().insert(msg, 0);
        self.aspect.advance_revision();
        Ok(())
    }

    /// Run `callback` once `msg` is published
    ///
    /// If it already is, the callback runs right away with `false` and
    /// nothing is registered. Otherwise the callback fires with `true` on the
    /// next publication of `msg` and then unregisters itself. Returns whether
    /// a wait was registered.
    pub fn wait_msg<F>(&self, msg: M, callback: F) -> bool
    where
        F: FnOnce(&MessageBus<M>, &M, bool) + 'static,
    {
        if self.is_published(&msg) {
            callback(self, &msg, false);
            return false;
        }

        let pending = RefCell::new(Some(callback));
        let target = msg.clone();
        let waiter = bus_sub(
            self.aspect.owner(),
            "WaitMsg",
            move |bus: &MessageBus<M>, published: &M| {
                if *published != target {
                    return;
                }
                let callback = pending.borrow_mut().take();
                if let Some(callback) = callback {
                    callback(bus, published, true);
                }
            },
        );
        let waiter: Rc<dyn BusSub<M>> = waiter;

        let waiter_handle = WeakHandle::new(&waiter);
        let cleanup_slot: Rc<RefCell<Option<WeakHandle<dyn BusSub<M>>>>> =
            Rc::new(RefCell::new(None));
        let slot = Rc::clone(&cleanup_slot);
        let target = msg.clone();
        let cleanup = bus_sub(
            self.aspect.owner(),
            "WaitMsgCleanup",
            move |bus: &MessageBus<M>, published: &M| {
                if *published != target {
                    return;
                }
                if let Some(waiter) = waiter_handle.upgrade() {
                    bus.subs.remove_sub(published, &waiter);
                }
                let this = slot.borrow().as_ref().and_then(WeakHandle::upgrade);
                if let Some(this) = this {
                    bus.subs.remove_sub(published, &this);
                }
            },
        );
        let cleanup: Rc<dyn BusSub<M>> = cleanup;
        *cleanup_slot.borrow_mut() = Some(WeakHandle::new(&cleanup));

        self.subs.add_sub(&msg, &waiter);
        self.subs.add_sub(&msg, &cleanup);
        self.aspect.advance_revision();
        true
    }

    /// Subscribe `sub` to `msg`
    pub fn add_sub<S: BusSub<M> + 'static>(&self, msg: &M, sub: &Rc<S>) -> ContextResult<()> {
        let sub: Rc<dyn BusSub<M>> = sub.clone();
        if !self.subs.add_sub(msg, &sub) {
            let err = ContextError::DuplicateRegistration(format!("{} on {:?}", sub.scope_name(), msg));
            self.aspect.error(format_args!("{}", err));
            return Err(err);
        }
        self.aspect.advance_revision();
        Ok(())
    }

    /// Subscribe a closure to `msg`, owned by `owner`
    pub fn add_sub_fn<O, F>(&self, msg: &M, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&MessageBus<M>, &M) + 'static,
    {
        let sub = bus_sub(owner, "BusSub", f);
        let erased: Rc<dyn BusSub<M>> = sub.clone();
        self.subs.add_sub(msg, &erased);
        self.aspect.advance_revision();
        sub
    }

    pub fn remove_sub<S: BusSub<M> + 'static>(&self, msg: &M, sub: &Rc<S>) -> ContextResult<()> {
        let sub: Rc<dyn BusSub<M>> = sub.clone();
        if !self.subs.remove_sub(msg, &sub) {
            let err = ContextError::NotRegistered(format!("{} on {:?}", sub.scope_name(), msg));
            self.aspect.error(format_args!("{}", err));
            return Err(err);
        }
        self.aspect.advance_revision();
        Ok(())
    }

    /// Raw subscriber count for `msg`
    pub fn sub_count(&self, msg: &M) -> usize {
        self.subs.sub_count(msg)
    }

    /// Hear every message on this bus
    pub fn add_watcher<S: BusSub<M> + 'static>(&self, watcher: &Rc<S>) -> bool {
        let watcher: Rc<dyn BusSub<M>> = watcher.clone();
        self.subs.add_global_sub(&watcher)
    }

    pub fn add_watcher_fn<O, F>(&self, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&MessageBus<M>, &M) + 'static,
    {
        let watcher = bus_sub(owner, "BusWatcher", f);
        self.add_watcher(&watcher);
        watcher
    }

    pub fn remove_watcher<S: BusSub<M> + 'static>(&self, watcher: &Rc<S>) -> bool {
        let watcher: Rc<dyn BusSub<M>> = watcher.clone();
        self.subs.remove_global_sub(&watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.subs.global_sub_count()
    }

    /// Sweep dead subscribers and watchers
    pub fn collect_garbage(&self) -> usize {
        self.subs.collect_garbage()
    }

    pub fn use_count(&self, msg: &M) -> usize {
        self.counts.borrow().get(msg).copied().unwrap_or(0)
    }

    pub fn token(&self, msg: &M) -> Option<Token> {
        self.tokens.borrow().get(msg).cloned()
    }

    /// Check whether `msg` was ever published
    pub fn is_known(&self, msg: &M) -> bool {
        self.known_set.borrow().contains(msg)
    }

    /// Check whether `msg` has a use count above zero
    pub fn is_published(&self, msg: &M) -> bool {
        self.use_count(msg) > 0
    }

    /// Every message ever published, in first publication order
    pub fn known_messages(&self) -> Vec<M> {
        self.known.borrow().clone()
    }

    /// Known messages whose use count is above zero
    pub fn existing_messages(&self) -> Vec<M> {
        self.known
            .borrow()
            .iter()
            .filter(|msg| self.is_published(msg))
            .cloned()
            .collect()
    }

    /// The `index`-th known message
    pub fn known_message(&self, index: usize) -> ContextResult<M> {
        let known = self.known.borrow();
        match known.get(index) {
            Some(msg) => Ok(msg.clone()),
            None => {
                let err = ContextError::OutOfRange {
                    index,
                    len: known.len(),
                };
                drop(known);
                self.aspect.error(format_args!("{}", err));
                Err(err)
            }
        }
    }

    /// Most recent publication
    pub fn last(&self) -> Option<MessageLog<M>> {
        self.last.borrow().clone()
    }
}

impl<M> fmt::Debug for MessageBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("aspect", &self.aspect)
            .field("known", &self.known.borrow().len())
            .field("subs", &self.subs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CollectingSink;
    use std::cell::Cell;
    use tether_weak::ScopedOwner;

    fn bus() -> (MessageBus<&'static str>, Rc<CollectingSink>) {
        let sink = Rc::new(CollectingSink::new());
        (MessageBus::with_sink("bus", sink.clone()), sink)
    }

    #[test]
    fn test_publish_counts_and_records_last() {
        let (bus, _) = bus();
        bus.publish("x", None).unwrap();
        bus.publish("x", None).unwrap();
        bus.publish("y", None).unwrap();

        assert_eq!(bus.use_count(&"x"), 2);
        assert_eq!(bus.use_count(&"z"), 0);
        assert_eq!(bus.last().map(|log| log.message), Some("y"));
        assert_eq!(bus.known_messages(), vec!["x", "y"]);
        assert_eq!(bus.revision(), 3);
    }

    #[test]
    fn test_token_gate() {
        let (bus, sink) = bus();
        let owner = ScopedOwner::new();
        let a = Token::new();
        let b = Token::new();
        let heard = Rc::new(Cell::new(0));

        bus.publish("m", Some(&a)).unwrap();
        assert_eq!(bus.token(&"m"), Some(a.clone()));

        let counter = Rc::clone(&heard);
        bus.add_sub_fn(&"m", &owner, move |_, _| counter.set(counter.get() + 1));
        let counter = Rc::clone(&heard);
        bus.add_watcher_fn(&owner, move |_, _| counter.set(counter.get() + 10));
        let revision = bus.revision();

        let err = bus.publish("m", Some(&b)).unwrap_err();
        assert!(matches!(err, ContextError::TokenMismatch { .. }));
        assert!(bus.clear("m", Some(&b)).is_err());
        assert_eq!(heard.get(), 0);
        assert_eq!(bus.use_count(&"m"), 1);
        assert_eq!(bus.revision(), revision);
        assert_eq!(sink.errors().len(), 2);

        bus.publish("m", Some(&a)).unwrap();
        bus.publish("m", None).unwrap();
        assert_eq!(bus.use_count(&"m"), 3);
        assert_eq!(heard.get(), 22);
    }

    #[test]
    fn test_rejected_publish_does_not_make_known() {
        let (bus, _) = bus();
        let a = Token::new();
        bus.clear("m", Some(&a)).unwrap();
        assert!(!bus.is_known(&"m"));

        assert!(bus.publish("m", Some(&Token::new())).is_err());
        assert!(!bus.is_known(&"m"));
        assert!(bus.known_messages().is_empty());
    }

    #[test]
    fn test_publish_once() {
        let (bus, sink) = bus();
        bus.publish_once("x", None, false).unwrap();
        let err = bus.publish_once("x", None, false).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyPublished(_)));
        assert_eq!(bus.use_count(&"x"), 1);
        assert_eq!(sink.errors().len(), 1);

        // Debug severity for expected rejections
        assert!(bus.publish_once("x", None, true).is_err());
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn test_clear_keeps_message_known() {
        let (bus, _) = bus();
        let token = Token::new();
        bus.publish("x", Some(&token)).unwrap();
        bus.publish("y", None).unwrap();

        assert!(bus.clear("x", Some(&Token::new())).is_err());
        bus.clear("x", Some(&token)).unwrap();

        assert_eq!(bus.use_count(&"x"), 0);
        assert!(bus.is_known(&"x"));
        assert!(!bus.is_published(&"x"));
        assert_eq!(bus.existing_messages(), vec!["y"]);
        assert_eq!(bus.revision(), 3);

        // Published again after a clear
        bus.publish_once("x", None, false).unwrap();
    }

    #[test]
    fn test_subscribers_then_watchers() {
        let (bus, _) = bus();
        let owner = ScopedOwner::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&order);
        let _watcher = bus.add_watcher_fn(&owner, move |_, msg: &&'static str| {
            log.borrow_mut().push(format!("watcher:{}", msg))
        });
        let log = Rc::clone(&order);
        let _sub = bus.add_sub_fn(&"x", &owner, move |_, msg: &&'static str| {
            log.borrow_mut().push(format!("sub:{}", msg))
        });

        bus.publish("x", None).unwrap();
        bus.publish("y", None).unwrap();
        assert_eq!(*order.borrow(), vec!["sub:x", "watcher:x", "watcher:y"]);
        assert_eq!(bus.watcher_count(), 1);
        assert_eq!(bus.sub_count(&"x"), 1);
    }

    #[test]
    fn test_sub_registration_errors() {
        let (bus, sink) = bus();
        let owner = ScopedOwner::new();
        let sub = bus_sub(&owner, "BusSub", |_: &MessageBus<&'static str>, _: &&'static str| {});

        bus.add_sub(&"x", &sub).unwrap();
        let revision = bus.revision();
        assert!(matches!(
            bus.add_sub(&"x", &sub),
            Err(ContextError::DuplicateRegistration(_))
        ));
        assert_eq!(bus.revision(), revision);

        bus.remove_sub(&"x", &sub).unwrap();
        assert!(matches!(
            bus.remove_sub(&"x", &sub),
            Err(ContextError::NotRegistered(_))
        ));
        assert_eq!(sink.errors().len(), 2);
    }

    #[test]
    fn test_wait_msg_fires_once() {
        let (bus, _) = bus();
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&fired);
        assert!(bus.wait_msg("ready", move |_, msg, was_pending| {
            log.borrow_mut().push((*msg, was_pending))
        }));
        assert_eq!(bus.sub_count(&"ready"), 2);
        assert_eq!(bus.revision(), 1);

        bus.publish("ready", None).unwrap();
        bus.publish("ready", None).unwrap();
        assert_eq!(*fired.borrow(), vec![("ready", true)]);
        assert_eq!(bus.sub_count(&"ready"), 0);
        assert_eq!(bus.aspect().owner().subscription_count(), 0);

        let log = Rc::clone(&fired);
        assert!(!bus.wait_msg("ready", move |_, msg, was_pending| {
            log.borrow_mut().push((*msg, was_pending))
        }));
        assert_eq!(fired.borrow().last(), Some(&("ready", false)));
    }

    #[test]
    fn test_wait_msg_ignores_other_messages() {
        let (bus, _) = bus();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        bus.wait_msg("ready", move |_, _, _| counter.set(counter.get() + 1));

        bus.publish("other", None).unwrap();
        assert_eq!(fired.get(), 0);
        bus.publish("ready", None).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_wait_msg_callback_can_republish() {
        let (bus, _) = bus();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        bus.wait_msg("ready", move |bus, msg, _| {
            counter.set(counter.get() + 1);
            bus.publish(*msg, None).unwrap();
        });

        bus.publish("ready", None).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(bus.use_count(&"ready"), 2);
        assert_eq!(bus.sub_count(&"ready"), 0);
    }

    struct OneShot {
        fired: Cell<usize>,
        this: std::rc::Weak<OneShot>,
    }

    impl Scoped for OneShot {}

    impl BusSub<&'static str> for OneShot {
        fn on_msg(&self, bus: &MessageBus<&'static str>, msg: &&'static str) {
            self.fired.set(self.fired.get() + 1);
            if let Some(this) = self.this.upgrade() {
                bus.remove_sub(msg, &this).unwrap();
            }
        }
    }

    #[test]
    fn test_unsubscribe_self_inside_callback() {
        let (bus, _) = bus();
        let sub = Rc::new_cyclic(|this| OneShot {
            fired: Cell::new(0),
            this: this.clone(),
        });
        bus.add_sub(&"x", &sub).unwrap();

        bus.publish("x", None).unwrap();
        bus.publish("x", None).unwrap();
        assert_eq!(sub.fired.get(), 1);
        assert_eq!(bus.sub_count(&"x"), 0);
    }

    #[test]
    fn test_known_message_out_of_range() {
        let (bus, sink) = bus();
        bus.publish("a", None).unwrap();
        assert_eq!(bus.known_message(0), Ok("a"));
        assert_eq!(
            bus.known_message(3),
            Err(ContextError::OutOfRange { index: 3, len: 1 })
        );
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn test_reads_do_not_advance_revision() {
        let (bus, _) = bus();
        bus.publish("a", None).unwrap();
        let revision = bus.revision();

        let _ = bus.use_count(&"a");
        let _ = bus.token(&"a");
        let _ = bus.known_messages();
        let _ = bus.existing_messages();
        let _ = bus.last();
        assert_eq!(bus.revision(), revision);
    }

    #[test]
    fn test_dropped_owner_silences_subscriber() {
        let (bus, _) = bus();
        let owner = ScopedOwner::new();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let sub = bus.add_sub_fn(&"x", &owner, move |_, _| counter.set(counter.get() + 1));
        drop(sub);

        bus.publish("x", None).unwrap();
        drop(owner);
        bus.publish("x", None).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(bus.collect_garbage(), 0);
        assert_eq!(bus.sub_count(&"x"), 0);
    }
}
