//! Quiesce: grace-period (RCU-style) memory reclamation
//!
//! Quiesce lets a single writer publish and retract references to shared
//! data concurrently with many readers, and defers destruction of
//! retracted data until no reader can still observe it. Grace periods are
//! detected by a background reclaimer that cooperates with the reader
//! fast paths without ever making a reader block.
//!
//! # Key Properties
//!
//! - **Cheap read sections**: entering and leaving a critical section is a
//!   few relaxed stores and a fence; readers never take the controller
//!   lock outside registration
//! - **Deferred destruction**: retracted nodes are destroyed by callbacks
//!   that run exactly once, after every registered reader has passed a
//!   quiescent point
//! - **Background reclamation**: a reclaimer thread polls on a short tick,
//!   so writers never wait for readers
//! - **Section-bound pointers**: read-side loads return pointers that
//!   cannot outlive the critical section they were loaded in
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use quiesce::{List, Rcu, Reader};
//!
//! let rcu = Rcu::new();
//! let reader = Arc::new(Reader::new());
//! rcu.register(&reader).unwrap();
//! rcu.start_background();
//!
//! let list = List::new();
//! assert!(list.toggle(7).is_none()); // insert
//!
//! {
//!     let section = reader.enter();
//!     assert!(list.lookup(7, &section));
//! }
//!
//! // Unlink, then hand the node to the reclaimer; it is freed only after
//! // a grace period.
//! if let Some(node) = list.toggle(7) {
//!     unsafe { rcu.retire(node.as_ptr()).unwrap() };
//! }
//!
//! rcu.stop_background();
//! rcu.unregister(&reader);
//! ```

#![warn(missing_docs)]

mod callback;
mod event;
mod link;
mod list;
mod rcu;
mod reader;

pub use callback::CallbackFn;
pub use link::{Link, Protected};
pub use list::{Iter, List, Node};
pub use rcu::{Error, Rcu};
pub use reader::{ReadSection, Reader};
