//! Event channel

use crate::aspect::Aspect;
use crate::log::LogSink;
use crate::types::{AspectId, LogId};
use crate::watcher::{event_watcher, EventWatcher, WatcherList};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tether_weak::{Owner, Subscription};

/// Record of a fired event
#[derive(Debug, Clone)]
pub struct EventLog<E> {
    pub channel: AspectId,
    pub identity: LogId,
    pub time: DateTime<Utc>,
    pub event: E,
}

/// Fires events of one type to every watcher
pub struct Channel<E: 'static> {
    aspect: Aspect,
    last: RefCell<Option<EventLog<E>>>,
    watchers: WatcherList<EventLog<E>>,
}

impl<E: Clone + fmt::Debug + 'static> Channel<E> {
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
            watchers: WatcherList::new(),
        }
    }

    pub fn aspect(&self) -> &Aspect {
        &self.aspect
    }

    pub fn fire_event(&self, event: E) {
        let log = EventLog {
            channel: self.aspect.id(),
            identity: LogId::next(),
            time: Utc::now(),
            event,
        };
        *self.last.borrow_mut() = Some(log.clone());
        self.aspect.advance_revision();
        if self.aspect.debug_enabled() {
            self.aspect.debug(format_args!("FireEvent: {:?}", log.event));
        }
        self.watchers.notify(&self.aspect, &log);
    }

    pub fn last(&self) -> Option<EventLog<E>> {
        self.last.borrow().clone()
    }

    pub fn add_watcher<W: EventWatcher<EventLog<E>> + 'static>(&self, watcher: &Rc<W>) -> bool {
        self.watchers.add(watcher)
    }

    pub fn add_watcher_fn<O, F>(&self, owner: &Rc<O>, f: F) -> Rc<Subscription<F>>
    where
        O: Owner + 'static,
        F: Fn(&Aspect, &EventLog<E>) + 'static,
    {
        let watcher = event_watcher(owner, f);
        self.watchers.add(&watcher);
        watcher
    }

    pub fn remove_watcher<W: EventWatcher<EventLog<E>> + 'static>(&self, watcher: &Rc<W>) -> bool {
        self.watchers.remove(watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.count()
    }
}
