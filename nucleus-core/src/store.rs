//! Atom Store
//!
//! The store is the registry mapping atom keys to live atoms. It is an
//! explicit object rather than process-wide state: create one, hand clones of
//! it to whoever needs to create or look up atoms, and call
//! [`AtomStore::clear`] to tear everything down.
//!
//! # Ordering
//!
//! Entries keep insertion order. Re-registering a key replaces the atom in
//! place, so the key keeps its original position.
//!
//! # Type Erasure
//!
//! Atoms of different value types share one store. The store holds them as
//! [`AnyAtom`] trait objects; typed access goes through [`AtomStore::get`],
//! which downcasts and returns `None` on a type mismatch.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::atom::{Atom, AtomOptions};
use crate::error::AtomResult;
use crate::value::{self, AtomValue, ValueKind};

/// Object-safe view of an atom, whatever its value type.
pub trait AnyAtom: Send + Sync {
    /// The atom's key.
    fn key(&self) -> &str;

    /// Unique ID of the atom instance.
    fn id(&self) -> u64;

    /// Shape tag decided at creation.
    fn kind(&self) -> ValueKind;

    /// `"array"`, `"object"`, or the primitive type name.
    fn type_name(&self) -> &'static str;

    /// The current value in its JSON shape.
    fn snapshot(&self) -> AtomResult<Value>;

    /// Whether `destroy` has run.
    fn is_destroyed(&self) -> bool;

    /// Restore the default value through the full pipeline.
    fn reset(&self) -> AtomResult<()>;

    /// Destroy the atom.
    fn destroy(&self);

    /// Downcasting hook.
    fn as_any(&self) -> &dyn Any;
}

impl<T: AtomValue> AnyAtom for Atom<T> {
    fn key(&self) -> &str {
        Atom::key(self)
    }

    fn id(&self) -> u64 {
        Atom::id(self)
    }

    fn kind(&self) -> ValueKind {
        Atom::kind(self)
    }

    fn type_name(&self) -> &'static str {
        Atom::type_name(self)
    }

    fn snapshot(&self) -> AtomResult<Value> {
        value::to_json(&*self.value())
    }

    fn is_destroyed(&self) -> bool {
        Atom::is_destroyed(self)
    }

    fn reset(&self) -> AtomResult<()> {
        Atom::reset(self)
    }

    fn destroy(&self) {
        Atom::destroy(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Random draws before `unused_key` falls back to sequential suffixes.
const CLONE_KEY_ATTEMPTS: usize = 64;

type Registry = RwLock<IndexMap<String, Arc<dyn AnyAtom>>>;

/// Registry of live atoms.
///
/// Cloning the store shares the same registry.
#[derive(Clone)]
pub struct AtomStore {
    atoms: Arc<Registry>,
}

impl AtomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            atoms: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Create an atom registered in this store.
    pub fn create_atom<T: AtomValue>(&self, options: AtomOptions<T>) -> AtomResult<Atom<T>> {
        Atom::new(self, options)
    }

    /// Insert or replace the atom under its key.
    ///
    /// Returns the atom previously registered under that key, if any.
    pub fn register<T: AtomValue>(&self, atom: Atom<T>) -> Option<Arc<dyn AnyAtom>> {
        let key = atom.key().to_string();
        let previous = self.atoms.write().insert(key, Arc::new(atom));
        if let Some(previous) = &previous {
            debug!(key = %previous.key(), "atom replaced in registry");
        }
        previous
    }

    /// Typed lookup. `None` when the key is absent or holds another type.
    pub fn get<T: AtomValue>(&self, key: &str) -> Option<Atom<T>> {
        self.get_any(key)?.as_any().downcast_ref::<Atom<T>>().cloned()
    }

    /// Untyped lookup.
    pub fn get_any(&self, key: &str) -> Option<Arc<dyn AnyAtom>> {
        self.atoms.read().get(key).cloned()
    }

    /// Whether an atom is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.atoms.read().contains_key(key)
    }

    /// All live atoms in insertion order.
    pub fn list(&self) -> Vec<Arc<dyn AnyAtom>> {
        self.atoms.read().values().cloned().collect()
    }

    /// Registered keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.atoms.read().keys().cloned().collect()
    }

    /// A live view of the registry. Later inserts and removals are visible
    /// through it.
    pub fn as_map(&self) -> RegistryView {
        RegistryView {
            atoms: Arc::clone(&self.atoms),
        }
    }

    /// Number of registered atoms.
    pub fn len(&self) -> usize {
        self.atoms.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.atoms.read().is_empty()
    }

    /// Drop the registry entry for `key` without destroying the atom.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn AnyAtom>> {
        self.atoms.write().shift_remove(key)
    }

    /// Destroy every registered atom and empty the store.
    pub fn clear(&self) {
        let atoms = self.list();
        for atom in &atoms {
            atom.destroy();
        }
        self.atoms.write().clear();
        debug!(destroyed = atoms.len(), "store cleared");
    }

    /// Remove `key` only while it still points at the atom instance `id`.
    pub(crate) fn remove_instance(&self, key: &str, id: u64) {
        let mut atoms = self.atoms.write();
        if atoms.get(key).is_some_and(|atom| atom.id() == id) {
            atoms.shift_remove(key);
        }
    }

    /// `{prefix}{NNNN}` with a random four-digit suffix not yet registered.
    ///
    /// After `CLONE_KEY_ATTEMPTS` collisions the suffix is counted upward
    /// from 10000 instead, which always ends since the registry is finite.
    pub(crate) fn unused_key(&self, prefix: &str) -> String {
        let mut rng = rand::thread_rng();
        for _ in 0..CLONE_KEY_ATTEMPTS {
            let key = format!("{prefix}{}", rng.gen_range(1000..=9999));
            if !self.contains(&key) {
                return key;
            }
        }

        let atoms = self.atoms.read();
        (10_000u64..)
            .map(|suffix| format!("{prefix}{suffix}"))
            .find(|key| !atoms.contains_key(key))
            .unwrap_or_else(|| format!("{prefix}{}", u64::MAX))
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore {
            atoms: Arc::downgrade(&self.atoms),
        }
    }
}

impl Default for AtomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomStore").field("keys", &self.keys()).finish()
    }
}

/// Non-owning back-reference from an atom to its store.
#[derive(Clone)]
pub(crate) struct WeakStore {
    atoms: Weak<Registry>,
}

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<AtomStore> {
        self.atoms.upgrade().map(|atoms| AtomStore { atoms })
    }
}

/// Live, read-only view over a store's registry.
#[derive(Clone)]
pub struct RegistryView {
    atoms: Arc<Registry>,
}

impl RegistryView {
    /// Untyped lookup.
    pub fn get(&self, key: &str) -> Option<Arc<dyn AnyAtom>> {
        self.atoms.read().get(key).cloned()
    }

    /// Whether `key` is currently registered.
    pub fn contains_key(&self, key: &str) -> bool {
        self.atoms.read().contains_key(key)
    }

    /// Current keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.atoms.read().keys().cloned().collect()
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.atoms.read().len()
    }

    /// Whether the registry is currently empty.
    pub fn is_empty(&self) -> bool {
        self.atoms.read().is_empty()
    }

    /// Current entries as `(key, atom)` pairs.
    pub fn entries(&self) -> Vec<(String, Arc<dyn AnyAtom>)> {
        self.atoms
            .read()
            .iter()
            .map(|(key, atom)| (key.clone(), Arc::clone(atom)))
            .collect()
    }
}

impl fmt::Debug for RegistryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryView").field("keys", &self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_registers_and_lookup_is_typed() {
        let store = AtomStore::new();
        let atom = store.create_atom(AtomOptions::new("count", 1)).unwrap();

        let found = store.get::<i32>("count").unwrap();
        assert_eq!(found.id(), atom.id());
        assert!(store.get::<String>("count").is_none());
        assert!(store.get::<i32>("missing").is_none());
        assert_eq!(store.get_any("count").unwrap().type_name(), "number");
    }

    #[test]
    fn registration_overwrites_silently_and_keeps_position() {
        let store = AtomStore::new();
        store.create_atom(AtomOptions::new("a", 1)).unwrap();
        store.create_atom(AtomOptions::new("b", 2)).unwrap();
        let replacement = store.create_atom(AtomOptions::new("a", "text".to_string())).unwrap();

        assert_eq!(store.keys(), vec!["a", "b"]);
        assert_eq!(store.get::<String>("a").unwrap().id(), replacement.id());
        assert!(store.get::<i32>("a").is_none());
    }

    #[test]
    fn list_follows_insertion_order() {
        let store = AtomStore::new();
        for key in ["x", "y", "z"] {
            store.create_atom(AtomOptions::new(key, 0)).unwrap();
        }

        let keys: Vec<String> = store.list().iter().map(|a| a.key().to_string()).collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
    }

    #[test]
    fn map_view_is_live() {
        let store = AtomStore::new();
        let view = store.as_map();
        assert!(view.is_empty());

        let atom = store.create_atom(AtomOptions::new("later", json!({ "a": 1 }))).unwrap();
        assert!(view.contains_key("later"));
        assert_eq!(view.get("later").unwrap().snapshot().unwrap(), json!({ "a": 1 }));

        atom.destroy();
        assert!(!view.contains_key("later"));
        assert_eq!(view.len(), 0);
    }

    #[test]
    fn remove_leaves_the_atom_alive() {
        let store = AtomStore::new();
        let atom = store.create_atom(AtomOptions::new("k", 1)).unwrap();

        assert!(store.remove("k").is_some());
        assert!(!store.contains("k"));
        assert!(!atom.is_destroyed());
        atom.update(2).unwrap();
        assert_eq!(*atom.value(), 2);
    }

    #[test]
    fn clear_destroys_everything() {
        let store = AtomStore::new();
        let a = store.create_atom(AtomOptions::new("a", 1)).unwrap();
        let b = store.create_atom(AtomOptions::new("b", vec![1])).unwrap();

        store.clear();

        assert!(store.is_empty());
        assert!(a.is_destroyed());
        assert!(b.is_destroyed());
    }

    #[test]
    fn unused_key_has_four_digit_suffix() {
        let store = AtomStore::new();
        let key = store.unused_key("userCloned");
        let suffix: u32 = key.trim_start_matches("userCloned").parse().unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn unused_key_falls_back_when_four_digit_suffixes_run_out() {
        let store = AtomStore::new();
        for suffix in 1000..=9999 {
            store
                .create_atom(AtomOptions::new(format!("fullCloned{suffix}"), 0))
                .unwrap();
        }

        let key = store.unused_key("fullCloned");
        assert_eq!(key, "fullCloned10000");
        assert!(!store.contains(&key));
    }

    #[test]
    fn erased_reset_restores_default() {
        let store = AtomStore::new();
        let atom = store.create_atom(AtomOptions::new("n", 3)).unwrap();
        atom.update(9).unwrap();

        store.get_any("n").unwrap().reset().unwrap();
        assert_eq!(*atom.value(), 3);
    }
}
