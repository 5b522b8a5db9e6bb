//! Nucleus Core
//!
//! This crate provides the core runtime for the Nucleus reactive value store.
//! It implements:
//!
//! - Atoms: named, observable value containers
//! - Key-level watchers over structural values
//! - Lifecycle events (update, reset, destroy)
//! - Actions bound to an atom instance
//! - Collections: atoms specialised for lists
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `event`: namespaced publish/subscribe channel used by every atom
//! - `value`: value kinds and dotted-path utilities
//! - `atom`: the atom container and its update pipeline
//! - `store`: the registry of live atoms
//! - `collection`: list operations on top of an atom
//!
//! # Example
//!
//! ```rust,ignore
//! use nucleus_core::{AtomOptions, AtomStore};
//!
//! let store = AtomStore::new();
//!
//! // Create an atom with an action
//! let counter = store.create_atom(
//!     AtomOptions::new("counter", 0).action("increment", |atom, _| {
//!         atom.update_with(|v, _| v + 1)?;
//!         Ok(serde_json::Value::Null)
//!     }),
//! )?;
//!
//! // Listen to changes
//! counter.on_change(|new, old, _| println!("{old} -> {new}"))?;
//!
//! counter.dispatch("increment", &[])?;
//! // Prints: "0 -> 1"
//! ```

pub mod atom;
pub mod collection;
pub mod error;
pub mod event;
pub mod store;
pub mod value;

pub use atom::{
    ActionFn, Atom, AtomEvent, AtomOptions, BeforeUpdate, ChangeCallback, Getter, WatchCallback,
};
pub use collection::{AtomCollection, CollectionOptions, IndexOrPredicate};
pub use error::{AtomError, AtomResult};
pub use event::{EventChannel, Subscription, SubscriptionId};
pub use store::{AnyAtom, AtomStore, RegistryView};
pub use value::{AtomValue, ValueKind};
