//! Atom Collections
//!
//! A collection is an atom holding a `Vec<T>` with list operations layered
//! on top. Every mutating operation stores a freshly built vector through the
//! regular update pipeline, so listeners and watchers see each change.
//!
//! The same operations are bound as named actions (`push`, `pop`,
//! `remove_item`, ...) taking JSON arguments, so a collection found through
//! the type-erased side of the store can still be driven with `dispatch`.
//!
//! # Policies
//!
//! - `pop` and `shift` on an empty list are no-ops: nothing is stored and no
//!   event fires.
//! - `remove_all` only returns the filtered list; it does not store it.

use std::fmt;
use std::ops::Deref;

use serde_json::{json, Value};

use crate::atom::{Atom, AtomOptions};
use crate::error::AtomResult;
use crate::store::AtomStore;
use crate::value::{self, AtomValue};

/// Selects one element either by position or by the first match.
pub enum IndexOrPredicate<'a, T> {
    Index(usize),
    Predicate(Box<dyn Fn(&T, usize) -> bool + 'a>),
}

impl<'a, T> IndexOrPredicate<'a, T> {
    /// Select the first element for which `predicate(item, index)` holds.
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&T, usize) -> bool + 'a,
    {
        IndexOrPredicate::Predicate(Box::new(predicate))
    }

    fn resolve(&self, items: &[T]) -> Option<usize> {
        match self {
            IndexOrPredicate::Index(index) => (*index < items.len()).then_some(*index),
            IndexOrPredicate::Predicate(predicate) => {
                items.iter().enumerate().position(|(i, item)| predicate(item, i))
            }
        }
    }
}

impl<T> From<usize> for IndexOrPredicate<'_, T> {
    fn from(index: usize) -> Self {
        IndexOrPredicate::Index(index)
    }
}

/// Construction options for a collection. The default value is an empty
/// list unless set.
pub struct CollectionOptions<T: AtomValue> {
    inner: AtomOptions<Vec<T>>,
}

impl<T: AtomValue> CollectionOptions<T> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            inner: AtomOptions::new(key, Vec::new()),
        }
    }

    /// Initial items.
    pub fn items(mut self, items: Vec<T>) -> Self {
        self.inner.default = items;
        self
    }

    pub fn before_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(Vec<T>, &Vec<T>, &Atom<Vec<T>>) -> Vec<T> + Send + Sync + 'static,
    {
        self.inner = self.inner.before_update(hook);
        self
    }

    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Vec<T>, &Vec<T>, &Atom<Vec<T>>) + Send + Sync + 'static,
    {
        self.inner = self.inner.on_update(callback);
        self
    }

    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&str, Option<Value>, &Vec<T>) -> Option<Value> + Send + Sync + 'static,
    {
        self.inner = self.inner.getter(getter);
        self
    }

    /// Extra action. Built-in list actions win on a name clash.
    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Atom<Vec<T>>, &[Value]) -> AtomResult<Value> + Send + Sync + 'static,
    {
        self.inner = self.inner.action(name, action);
        self
    }

    fn into_atom_options(self) -> AtomOptions<Vec<T>> {
        self.inner
            .action("push", |atom, args| {
                push(atom, parse_items(args)?)?;
                Ok(Value::Null)
            })
            .action("unshift", |atom, args| {
                unshift(atom, parse_items(args)?)?;
                Ok(Value::Null)
            })
            .action("pop", |atom, _| {
                pop(atom)?;
                Ok(Value::Null)
            })
            .action("shift", |atom, _| {
                shift(atom)?;
                Ok(Value::Null)
            })
            .action("remove", |atom, args| {
                if let Some(index) = arg_index(args) {
                    remove(atom, IndexOrPredicate::Index(index))?;
                }
                Ok(Value::Null)
            })
            .action("remove_item", |atom, args| {
                let item: T = value::from_json(arg_value(args, 0))?;
                remove_item(atom, &item)?;
                Ok(Value::Null)
            })
            .action("remove_all", |atom, args| {
                let item: T = value::from_json(arg_value(args, 0))?;
                value::to_json(&remove_all(atom, &item))
            })
            .action("get", |atom, args| match arg_index(args) {
                Some(index) => value::to_json(&get(atom, &IndexOrPredicate::Index(index))),
                None => Ok(Value::Null),
            })
            .action("replace", |atom, args| {
                if let Some(index) = arg_index(args) {
                    let item: T = value::from_json(arg_value(args, 1))?;
                    replace(atom, index, item)?;
                }
                Ok(Value::Null)
            })
            .action("length", |atom, _| Ok(json!(atom.value().len())))
    }
}

/// An atom holding a list, with list operations.
///
/// Derefs to the underlying [`Atom`], so every atom operation (`on_change`,
/// `watch`, `reset`, `destroy`, ...) is available too.
pub struct AtomCollection<T: AtomValue> {
    atom: Atom<Vec<T>>,
}

impl<T: AtomValue> AtomCollection<T> {
    /// Create a collection and register it in `store`.
    pub fn new(store: &AtomStore, options: CollectionOptions<T>) -> AtomResult<Self> {
        let atom = Atom::new(store, options.into_atom_options())?;
        Ok(Self { atom })
    }

    /// The underlying atom.
    pub fn atom(&self) -> &Atom<Vec<T>> {
        &self.atom
    }

    /// Append items.
    pub fn push<I: IntoIterator<Item = T>>(&self, items: I) -> AtomResult<()> {
        push(&self.atom, items)
    }

    /// Prepend items, keeping their order.
    pub fn unshift<I: IntoIterator<Item = T>>(&self, items: I) -> AtomResult<()> {
        unshift(&self.atom, items)
    }

    /// Drop the last item.
    pub fn pop(&self) -> AtomResult<()> {
        pop(&self.atom)
    }

    /// Drop the first item.
    pub fn shift(&self) -> AtomResult<()> {
        shift(&self.atom)
    }

    /// Remove the selected item. Nothing happens when nothing is selected.
    pub fn remove<'a>(&self, selector: impl Into<IndexOrPredicate<'a, T>>) -> AtomResult<()> {
        remove(&self.atom, selector.into())
    }

    /// Remove the first item equal to `item`.
    pub fn remove_item(&self, item: &T) -> AtomResult<()> {
        remove_item(&self.atom, item)
    }

    /// The list without any item equal to `item`. The atom is not updated.
    // TODO: decide whether this should store its result like the other
    // removals; callers currently rely on it being read-only.
    pub fn remove_all(&self, item: &T) -> Vec<T> {
        remove_all(&self.atom, item)
    }

    /// The selected item, if any.
    pub fn get<'a>(&self, selector: impl Into<IndexOrPredicate<'a, T>>) -> Option<T> {
        get(&self.atom, &selector.into())
    }

    /// Position of the first item matching `predicate`.
    pub fn index<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&T, usize) -> bool,
    {
        IndexOrPredicate::matching(predicate).resolve(&self.atom.value())
    }

    /// Store `transform` applied to every item, and return the new list.
    pub fn map<F>(&self, transform: F) -> AtomResult<Vec<T>>
    where
        F: Fn(&T, usize) -> T,
    {
        self.atom.locked(|| {
            let mapped: Vec<T> = self
                .atom
                .value()
                .iter()
                .enumerate()
                .map(|(i, item)| transform(item, i))
                .collect();
            self.atom.update(mapped.clone())?;
            Ok(mapped)
        })
    }

    /// Visit every item without changing anything.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&T, usize),
    {
        for (i, item) in self.atom.value().iter().enumerate() {
            visit(item, i);
        }
    }

    /// Store a copy with the item at `index` replaced. Always notifies.
    pub fn replace(&self, index: usize, item: T) -> AtomResult<()> {
        replace(&self.atom, index, item)
    }

    /// Current number of items.
    pub fn len(&self) -> usize {
        self.atom.value().len()
    }

    /// Whether the list is currently empty.
    pub fn is_empty(&self) -> bool {
        self.atom.value().is_empty()
    }
}

impl<T: AtomValue> Deref for AtomCollection<T> {
    type Target = Atom<Vec<T>>;

    fn deref(&self) -> &Self::Target {
        &self.atom
    }
}

impl<T: AtomValue> Clone for AtomCollection<T> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
        }
    }
}

impl<T: AtomValue> From<Atom<Vec<T>>> for AtomCollection<T> {
    fn from(atom: Atom<Vec<T>>) -> Self {
        Self { atom }
    }
}

impl<T> fmt::Debug for AtomCollection<T>
where
    T: AtomValue + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomCollection")
            .field("key", &self.atom.key())
            .field("items", &self.atom.value())
            .finish()
    }
}

impl AtomStore {
    /// Create a collection registered in this store.
    pub fn create_collection<T: AtomValue>(
        &self,
        options: CollectionOptions<T>,
    ) -> AtomResult<AtomCollection<T>> {
        AtomCollection::new(self, options)
    }

    /// Typed collection lookup.
    pub fn get_collection<T: AtomValue>(&self, key: &str) -> Option<AtomCollection<T>> {
        self.get::<Vec<T>>(key).map(AtomCollection::from)
    }
}

// ----------------------------------------------------------------------------
// List operations shared by the typed methods and the bound actions
// ----------------------------------------------------------------------------

fn push<T: AtomValue, I: IntoIterator<Item = T>>(atom: &Atom<Vec<T>>, items: I) -> AtomResult<()> {
    atom.update_with(|list, _| list.iter().cloned().chain(items).collect())
}

fn unshift<T: AtomValue, I: IntoIterator<Item = T>>(
    atom: &Atom<Vec<T>>,
    items: I,
) -> AtomResult<()> {
    atom.update_with(|list, _| items.into_iter().chain(list.iter().cloned()).collect())
}

fn pop<T: AtomValue>(atom: &Atom<Vec<T>>) -> AtomResult<()> {
    atom.locked(|| {
        let list = atom.value();
        match list.split_last() {
            Some((_, rest)) => atom.update(rest.to_vec()),
            None => Ok(()),
        }
    })
}

fn shift<T: AtomValue>(atom: &Atom<Vec<T>>) -> AtomResult<()> {
    atom.locked(|| {
        let list = atom.value();
        match list.split_first() {
            Some((_, rest)) => atom.update(rest.to_vec()),
            None => Ok(()),
        }
    })
}

fn remove<T: AtomValue>(atom: &Atom<Vec<T>>, selector: IndexOrPredicate<'_, T>) -> AtomResult<()> {
    atom.locked(|| {
        let list = atom.value();
        match selector.resolve(&list) {
            Some(index) => atom.update(without(&list, index)),
            None => Ok(()),
        }
    })
}

fn remove_item<T: AtomValue>(atom: &Atom<Vec<T>>, item: &T) -> AtomResult<()> {
    atom.locked(|| {
        let list = atom.value();
        match list.iter().position(|existing| existing == item) {
            Some(index) => atom.update(without(&list, index)),
            None => Ok(()),
        }
    })
}

fn remove_all<T: AtomValue>(atom: &Atom<Vec<T>>, item: &T) -> Vec<T> {
    atom.value()
        .iter()
        .filter(|existing| *existing != item)
        .cloned()
        .collect()
}

fn get<T: AtomValue>(atom: &Atom<Vec<T>>, selector: &IndexOrPredicate<'_, T>) -> Option<T> {
    let list = atom.value();
    selector.resolve(&list).map(|index| list[index].clone())
}

fn replace<T: AtomValue>(atom: &Atom<Vec<T>>, index: usize, item: T) -> AtomResult<()> {
    atom.update_with(|list, _| {
        let mut next = list.clone();
        if let Some(slot) = next.get_mut(index) {
            *slot = item;
        }
        next
    })
}

fn without<T: Clone>(list: &[T], index: usize) -> Vec<T> {
    list.iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, item)| item.clone())
        .collect()
}

fn parse_items<T: AtomValue>(args: &[Value]) -> AtomResult<Vec<T>> {
    args.iter().cloned().map(value::from_json).collect()
}

fn arg_index(args: &[Value]) -> Option<usize> {
    args.first()
        .and_then(Value::as_u64)
        .and_then(|index| usize::try_from(index).ok())
}

fn arg_value(args: &[Value], position: usize) -> Value {
    args.get(position).cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn numbers(store: &AtomStore, items: Vec<i32>) -> (AtomCollection<i32>, Arc<AtomicUsize>) {
        let updates = Arc::new(AtomicUsize::new(0));
        let updates_clone = updates.clone();
        let list = store
            .create_collection(CollectionOptions::new("numbers").items(items).on_update(
                move |_, _, _| {
                    updates_clone.fetch_add(1, Ordering::SeqCst);
                },
            ))
            .unwrap();
        (list, updates)
    }

    #[test]
    fn defaults_to_an_empty_list() {
        let store = AtomStore::new();
        let list: AtomCollection<String> =
            store.create_collection(CollectionOptions::new("empty")).unwrap();

        assert!(list.is_empty());
        assert_eq!(list.type_name(), "array");
    }

    #[test]
    fn push_and_unshift_keep_order() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![3]);

        list.push([4, 5]).unwrap();
        list.unshift([1, 2]).unwrap();

        assert_eq!(*list.value(), vec![1, 2, 3, 4, 5]);
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pop_and_shift_on_empty_do_not_fire() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2]);

        list.pop().unwrap();
        list.shift().unwrap();
        assert!(list.is_empty());
        assert_eq!(updates.load(Ordering::SeqCst), 2);

        list.pop().unwrap();
        list.shift().unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_by_index_or_predicate() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![10, 20, 30, 40]);

        list.remove(1).unwrap();
        assert_eq!(*list.value(), vec![10, 30, 40]);

        list.remove(IndexOrPredicate::matching(|n: &i32, _| *n > 25)).unwrap();
        assert_eq!(*list.value(), vec![10, 40]);

        list.remove(9).unwrap();
        list.remove(IndexOrPredicate::matching(|n: &i32, _| *n == 0)).unwrap();
        assert_eq!(*list.value(), vec![10, 40]);
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_item_changes_identity() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2, 1]);
        let before = list.value();

        list.remove_item(&1).unwrap();
        assert_eq!(*list.value(), vec![2, 1]);
        assert!(!Arc::ptr_eq(&before, &list.value()));
        assert_eq!(*before, vec![1, 2, 1]);

        list.remove_item(&7).unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_does_not_store() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2, 1, 3]);

        assert_eq!(list.remove_all(&1), vec![2, 3]);
        assert_eq!(*list.value(), vec![1, 2, 1, 3]);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_and_index() {
        let store = AtomStore::new();
        let (list, _) = numbers(&store, vec![5, 6, 7]);

        assert_eq!(list.get(0), Some(5));
        assert_eq!(list.get(3), None);
        assert_eq!(list.get(IndexOrPredicate::matching(|n: &i32, _| n % 2 == 0)), Some(6));
        assert_eq!(list.index(|n, _| *n == 7), Some(2));
        assert_eq!(list.index(|n, _| *n == 8), None);
    }

    #[test]
    fn map_stores_and_returns() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2]);

        let mapped = list.map(|n, i| n * 10 + i as i32).unwrap();
        assert_eq!(mapped, vec![10, 21]);
        assert_eq!(*list.value(), vec![10, 21]);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn for_each_is_read_only() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2, 3]);
        let mut sum = 0;

        list.for_each(|n, _| sum += n);
        assert_eq!(sum, 6);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replace_always_fires() {
        let store = AtomStore::new();
        let (list, updates) = numbers(&store, vec![1, 2, 3]);

        list.replace(1, 9).unwrap();
        assert_eq!(*list.value(), vec![1, 9, 3]);

        list.replace(1, 9).unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn actions_drive_the_list_with_json() {
        let store = AtomStore::new();
        let (list, _) = numbers(&store, vec![1]);

        list.dispatch("push", &[json!(2), json!(3)]).unwrap();
        list.dispatch("unshift", &[json!(0)]).unwrap();
        assert_eq!(list.dispatch("length", &[]).unwrap(), json!(4));

        list.dispatch("remove", &[json!(0)]).unwrap();
        list.dispatch("replace", &[json!(0), json!(7)]).unwrap();
        assert_eq!(list.dispatch("get", &[json!(0)]).unwrap(), json!(7));

        list.dispatch("remove_item", &[json!(3)]).unwrap();
        assert_eq!(list.dispatch("remove_all", &[json!(7)]).unwrap(), json!([2]));
        assert_eq!(*list.value(), vec![7, 2]);

        list.dispatch("pop", &[]).unwrap();
        list.dispatch("shift", &[]).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn builtin_actions_win_over_caller_actions() {
        let store = AtomStore::new();
        let list: AtomCollection<i32> = store
            .create_collection(
                CollectionOptions::new("shadowed")
                    .action("push", |_, _| Ok(json!("custom")))
                    .action("sum", |atom, _| Ok(json!(atom.value().iter().sum::<i32>()))),
            )
            .unwrap();

        assert_eq!(list.dispatch("push", &[json!(4)]).unwrap(), Value::Null);
        assert_eq!(list.dispatch("sum", &[]).unwrap(), json!(4));
    }

    #[test]
    fn lookup_returns_a_typed_collection() {
        let store = AtomStore::new();
        let (list, _) = numbers(&store, vec![1]);

        let found = store.get_collection::<i32>("numbers").unwrap();
        found.push([2]).unwrap();
        assert_eq!(*list.value(), vec![1, 2]);
        assert!(store.get_collection::<String>("numbers").is_none());
    }
}
