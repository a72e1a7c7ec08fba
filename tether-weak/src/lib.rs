//! tether-weak - weak observer lists for single-threaded components
//!
//! Components register interest in each other without keeping each other
//! alive. The pieces, leaf to root:
//!
//! - [`WeakHandle`]: a non-owning reference with identity comparison
//! - [`WeakList`]: an observer list that tolerates being mutated while it is
//!   being traversed, and sweeps entries whose targets are gone
//! - [`Subscription`] / [`ScopedOwner`]: a callback bound to an owner; the
//!   owner keeps it alive, the lists only reference it weakly
//! - [`PubSub`]: per-key weak lists plus a global list
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use tether_weak::{PubSub, Scoped};
//!
//! struct Printer(&'static str);
//! impl Scoped for Printer {}
//!
//! let pubsub: PubSub<str, Printer> = PubSub::new();
//! let printer = Rc::new(Printer("first"));
//! pubsub.add_sub("greeting", &printer);
//!
//! let mut heard = Vec::new();
//! pubsub.publish("greeting", |sub| heard.push(sub.0));
//! assert_eq!(heard, vec!["first"]);
//!
//! drop(printer);
//! pubsub.publish("greeting", |sub| heard.push(sub.0));
//! assert_eq!(heard.len(), 1);
//! ```

pub mod handle;
pub mod list;
pub mod pubsub;
pub mod scope;

pub use handle::WeakHandle;
pub use list::WeakList;
pub use pubsub::PubSub;
pub use scope::{Owner, Scoped, ScopedOwner, Subscription};
