//! tether-context - message buses and request handlers
//!
//! Components built on [`tether_weak`]: nothing here keeps its subscribers
//! or watchers alive, and every callback may subscribe or unsubscribe while
//! it is being notified.
//!
//! - [`MessageBus`]: per-message subscribers, use counts, tokens and
//!   wait-for-first-publish
//! - [`Channel`]: fire-and-forget events to watchers
//! - [`RequestHandler`]: immediate request/response with uniform records
//! - [`CoroutineRequestHandler`]: request/response whose step suspends on a
//!   [`HostScheduler`]
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_context::MessageBus;
//!
//! let bus: MessageBus<&'static str> = MessageBus::new("lobby");
//! let ready = Rc::new(Cell::new(false));
//!
//! let flag = Rc::clone(&ready);
//! bus.wait_msg("ready", move |_, _, _| flag.set(true));
//! bus.publish("ready", None).unwrap();
//!
//! assert!(ready.get());
//! assert_eq!(bus.use_count(&"ready"), 1);
//! ```

pub mod aspect;
pub mod bus;
pub mod channel;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod handler;
pub mod log;
pub mod scheduler;
pub mod types;
pub mod watcher;

pub use aspect::Aspect;
pub use bus::{bus_sub, BusSub, MessageBus, MessageLog};
pub use channel::{Channel, EventLog};
pub use config::{ConfigError, ContextConfig};
pub use coroutine::{AsyncHandle, CoroutineRequestHandler, StepContext};
pub use error::{ContextError, ContextResult, HandlerFault};
pub use handler::{Handle, RequestHandler, RequestRecord, StatusCode};
pub use log::{CollectingSink, LogEntry, LogLevel, LogSink, TracingSink};
pub use scheduler::{FrameScheduler, HostScheduler};
pub use types::{AspectId, LogId, Token};
pub use watcher::{event_watcher, EventWatcher, WatcherList};
