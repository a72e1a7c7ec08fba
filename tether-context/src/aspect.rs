//! Shared core of every bus, channel and handler

use crate::config::ContextConfig;
use crate::log::{LogSink, TracingSink};
use crate::types::AspectId;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tether_weak::ScopedOwner;

/// Identity, revision, ownership and logging for one component
///
/// The revision starts at 0 and is advanced by exactly one on every
/// observable mutation. The embedded [`ScopedOwner`] keeps alive the
/// subscriptions this aspect registers on its own behalf.
pub struct Aspect {
    id: AspectId,
    name: String,
    revision: Cell<u64>,
    owner: Rc<ScopedOwner>,
    sink: Rc<dyn LogSink>,
}

impl Aspect {
    /// Create an aspect logging through `tracing`
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_sink(name, Rc::new(TracingSink::new()))
    }

    pub fn with_sink(name: impl Into<String>, sink: Rc<dyn LogSink>) -> Self {
        Self {
            id: AspectId::next(),
            name: name.into(),
            revision: Cell::new(0),
            owner: ScopedOwner::new(),
            sink,
        }
    }

    /// Create an aspect with configuration overrides applied
    pub fn with_config(name: impl Into<String>, config: &ContextConfig) -> Self {
        let name = config.name.clone().unwrap_or_else(|| name.into());
        let sink = match config.debug {
            Some(debug) => TracingSink::with_debug(debug),
            None => TracingSink::new(),
        };
        Self::with_sink(name, Rc::new(sink))
    }

    pub fn id(&self) -> AspectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    /// Bump the revision, returning the new value
    pub fn advance_revision(&self) -> u64 {
        let next = self.revision.get() + 1;
        self.revision.set(next);
        next
    }

    /// Owner of the subscriptions this aspect creates for itself
    pub fn owner(&self) -> &Rc<ScopedOwner> {
        &self.owner
    }

    pub fn sink(&self) -> &Rc<dyn LogSink> {
        &self.sink
    }

    /// `"<name> #<id> @<revision>"`
    pub fn log_prefix(&self) -> String {
        format!("{} {} @{}", self.name, self.id, self.revision.get())
    }

    pub fn debug_enabled(&self) -> bool {
        self.sink.debug_enabled()
    }

    pub fn error(&self, message: fmt::Arguments<'_>) {
        self.sink.error(&self.log_prefix(), message);
    }

    pub fn debug(&self, message: fmt::Arguments<'_>) {
        self.sink.debug(&self.log_prefix(), message);
    }

    /// Log at debug if `is_debug`, otherwise at error
    pub fn error_or_debug(&self, is_debug: bool, message: fmt::Arguments<'_>) {
        if is_debug {
            if self.debug_enabled() {
                self.debug(message);
            }
        } else {
            self.error(message);
        }
    }
}

impl fmt::Debug for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aspect")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("revision", &self.revision.get())
            .field("subscriptions", &self.owner.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CollectingSink;

    #[test]
    fn test_revision_advances_by_one() {
        let aspect = Aspect::new("probe");
        assert_eq!(aspect.revision(), 0);
        assert_eq!(aspect.advance_revision(), 1);
        assert_eq!(aspect.advance_revision(), 2);
        assert_eq!(aspect.revision(), 2);
    }

    #[test]
    fn test_identities_are_unique() {
        let a = Aspect::new("a");
        let b = Aspect::new("b");
        assert!(a.id() < b.id());
    }

    #[test]
    fn test_log_prefix_format() {
        let aspect = Aspect::new("bus");
        aspect.advance_revision();
        let expected = format!("bus #{:05} @1", aspect.id().0);
        assert_eq!(aspect.log_prefix(), expected);
    }

    #[test]
    fn test_error_or_debug_routing() {
        let sink = Rc::new(CollectingSink::new());
        let aspect = Aspect::with_sink("bus", sink.clone());

        aspect.error_or_debug(true, format_args!("quiet"));
        aspect.error_or_debug(false, format_args!("loud"));
        assert_eq!(sink.debugs(), vec!["quiet"]);
        assert_eq!(sink.errors(), vec!["loud"]);

        sink.set_debug_enabled(false);
        aspect.error_or_debug(true, format_args!("dropped"));
        assert_eq!(sink.debugs().len(), 1);
    }

    #[test]
    fn test_config_overrides() {
        let config = ContextConfig {
            name: Some("renamed".to_string()),
            debug: Some(true),
        };
        let aspect = Aspect::with_config("lobby", &config);
        assert_eq!(aspect.name(), "renamed");
        assert!(aspect.debug_enabled());

        let aspect = Aspect::with_config("kept", &ContextConfig::default());
        assert_eq!(aspect.name(), "kept");
    }
}
