//! Atom Implementation
//!
//! An Atom is a named, observable container holding a single value.
//!
//! # How Atoms Work
//!
//! 1. An atom is created from [`AtomOptions`] and registered in an
//!    [`AtomStore`] under its key.
//!
//! 2. Mutations go through one pipeline: resolve the next value, run the
//!    `before_update` hook, store it, fire the `update` event, then diff the
//!    watched paths and fire the per-path watchers.
//!
//! 3. Silent variants store the value without any notification.
//!
//! 4. `destroy` fires the `delete` event, drops every listener and watcher
//!    and removes the registry entry. The handle is inert afterwards.
//!
//! # Identity
//!
//! Passing the value the atom already holds (the same `Arc`) is a no-op. For
//! scalar atoms equal values count as the same value, so `update(5)` on an
//! atom holding `5` does nothing. Structural atoms compare by allocation:
//! a new but equal record still runs the pipeline, and the watchers decide
//! per path whether anything really changed.
//!
//! # Re-entrancy
//!
//! Listeners may call back into the atom. Each atom serializes its operations
//! behind a re-entrant lock, and no state lock is held while user code runs,
//! so a nested update completes before the outer dispatch resumes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{AtomError, AtomResult};
use crate::event::{EventChannel, Subscription, SubscriptionId};
use crate::store::{AtomStore, WeakStore};
use crate::value::{self, AtomValue, ValueKind};

/// Counter for generating unique atom instance IDs.
static ATOM_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_atom_id() -> u64 {
    ATOM_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Transform applied to every incoming value: `(next, &old, &atom) -> stored`.
pub type BeforeUpdate<T> = Arc<dyn Fn(T, &T, &Atom<T>) -> T + Send + Sync>;

/// Whole-value change listener: `(&new, &old, &atom)`.
pub type ChangeCallback<T> = Arc<dyn Fn(&T, &T, &Atom<T>) + Send + Sync>;

/// Custom reader replacing path lookups: `(path, default, &current)`.
pub type Getter<T> = Arc<dyn Fn(&str, Option<Value>, &T) -> Option<Value> + Send + Sync>;

/// An action bound to an atom. The atom is passed explicitly.
pub type ActionFn<T> = Arc<dyn Fn(&Atom<T>, &[Value]) -> AtomResult<Value> + Send + Sync>;

/// Per-path watcher: `(new_at_path, old_at_path)`; `None` means the path
/// did not resolve.
pub type WatchCallback = Arc<dyn Fn(Option<&Value>, Option<&Value>) + Send + Sync>;

type WatcherList = SmallVec<[(SubscriptionId, WatchCallback); 2]>;
type Watchers = RwLock<IndexMap<String, WatcherList>>;

/// Payload carried on an atom's event channel.
pub enum AtomEvent<T: AtomValue> {
    /// The value changed through a notifying mutation.
    Update {
        new: Arc<T>,
        old: Arc<T>,
        atom: Atom<T>,
    },
    /// `reset` or `silent_reset` ran.
    Reset(Atom<T>),
    /// `destroy` ran.
    Destroy(Atom<T>),
}

/// Construction options for an atom.
///
/// ```rust,ignore
/// let options = AtomOptions::new("counter", 0)
///     .before_update(|next, _old, _atom| next.max(0))
///     .action("increment", |atom, _args| {
///         atom.update_with(|v, _| v + 1)?;
///         Ok(serde_json::Value::Null)
///     });
/// ```
pub struct AtomOptions<T: AtomValue> {
    pub(crate) key: String,
    pub(crate) default: T,
    pub(crate) before_update: Option<BeforeUpdate<T>>,
    pub(crate) on_update: Option<ChangeCallback<T>>,
    pub(crate) getter: Option<Getter<T>>,
    pub(crate) actions: IndexMap<String, ActionFn<T>>,
}

impl<T: AtomValue> AtomOptions<T> {
    /// Options with the required key and default value.
    pub fn new(key: impl Into<String>, default: T) -> Self {
        Self {
            key: key.into(),
            default,
            before_update: None,
            on_update: None,
            getter: None,
            actions: IndexMap::new(),
        }
    }

    /// Adjust every incoming value before it is stored. The returned value
    /// is what gets stored.
    pub fn before_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(T, &T, &Atom<T>) -> T + Send + Sync + 'static,
    {
        self.before_update = Some(Arc::new(hook));
        self
    }

    /// Listener subscribed to the update event at creation.
    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T, &T, &Atom<T>) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(callback));
        self
    }

    /// Replace path lookups done by [`Atom::get`].
    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&str, Option<Value>, &T) -> Option<Value> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Bind a named action to the atom.
    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Atom<T>, &[Value]) -> AtomResult<Value> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// The key the atom will be registered under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Hooks that survive `clone_atom`.
struct Hooks<T: AtomValue> {
    before_update: Option<BeforeUpdate<T>>,
    on_update: Option<ChangeCallback<T>>,
    getter: Option<Getter<T>>,
}

struct AtomInner<T: AtomValue> {
    id: u64,
    key: String,
    kind: ValueKind,
    type_name: &'static str,
    update_topic: String,
    reset_topic: String,
    destroy_topic: String,
    namespace: String,

    default: Arc<T>,
    current: RwLock<Arc<T>>,

    hooks: Hooks<T>,
    actions: IndexMap<String, ActionFn<T>>,
    watchers: Arc<Watchers>,
    events: EventChannel<AtomEvent<T>>,

    /// Serializes whole operations; re-entrant so listeners can call back in.
    op_lock: ReentrantMutex<()>,
    destroyed: AtomicBool,
    store: WeakStore,
}

/// A named, observable value container.
///
/// `Atom` is a cheap handle: cloning it shares the same state (use
/// [`Atom::clone_atom`] for an independent copy).
pub struct Atom<T: AtomValue> {
    inner: Arc<AtomInner<T>>,
}

/// Where the next value comes from.
enum Next<'f, T: AtomValue> {
    Value(Arc<T>),
    With(Box<dyn FnOnce(&T, &Atom<T>) -> T + 'f>),
}

impl<T: AtomValue> Atom<T> {
    /// Create an atom and register it in `store`, replacing any atom already
    /// registered under the same key.
    pub fn new(store: &AtomStore, options: AtomOptions<T>) -> AtomResult<Self> {
        let shape = value::to_json(&options.default)?;
        let kind = ValueKind::of(&shape);
        let namespace = format!("atoms.{}", options.key);

        let on_update = options.on_update.clone();
        let default = Arc::new(options.default);

        let atom = Self {
            inner: Arc::new(AtomInner {
                id: next_atom_id(),
                update_topic: format!("{namespace}.update"),
                reset_topic: format!("{namespace}.reset"),
                destroy_topic: format!("{namespace}.delete"),
                namespace,
                key: options.key,
                kind,
                type_name: value::type_tag(&shape),
                current: RwLock::new(Arc::new(default.as_ref().clone())),
                default,
                hooks: Hooks {
                    before_update: options.before_update,
                    on_update: options.on_update,
                    getter: options.getter,
                },
                actions: options.actions,
                watchers: Arc::new(RwLock::new(IndexMap::new())),
                events: EventChannel::new(),
                op_lock: ReentrantMutex::new(()),
                destroyed: AtomicBool::new(false),
                store: store.downgrade(),
            }),
        };

        if let Some(callback) = on_update {
            atom.subscribe_update(callback);
        }

        debug!(
            key = %atom.key(),
            kind = %kind,
            actions = atom.inner.actions.len(),
            "atom created"
        );
        store.register(atom.clone());

        Ok(atom)
    }

    /// The atom's key.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Unique ID of this atom instance. Two atoms created under the same key
    /// have different IDs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Shape tag decided at creation.
    pub fn kind(&self) -> ValueKind {
        self.inner.kind
    }

    /// `"array"`, `"object"`, or the primitive type name.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    /// The current value.
    pub fn value(&self) -> Arc<T> {
        Arc::clone(&self.inner.current.read())
    }

    /// The value the atom was created with.
    pub fn default_value(&self) -> Arc<T> {
        Arc::clone(&self.inner.default)
    }

    /// Element count for sequence atoms, character count for string atoms.
    pub fn len(&self) -> Option<usize> {
        match value::to_json(&*self.value()).ok()? {
            Value::Array(items) => Some(items.len()),
            Value::String(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    /// Whether `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Replace the value, notifying listeners and watchers.
    pub fn update(&self, value: impl Into<Arc<T>>) -> AtomResult<()> {
        self.apply(Next::Value(value.into()), true, "update")
    }

    /// Compute the next value from the current one, notifying listeners and
    /// watchers.
    pub fn update_with<F>(&self, updater: F) -> AtomResult<()>
    where
        F: FnOnce(&T, &Atom<T>) -> T,
    {
        self.apply(Next::With(Box::new(updater)), true, "update")
    }

    /// Replace the value without notifying anyone.
    pub fn silent_update(&self, value: impl Into<Arc<T>>) -> AtomResult<()> {
        self.apply(Next::Value(value.into()), false, "silent_update")
    }

    /// Compute the next value without notifying anyone.
    pub fn silent_update_with<F>(&self, updater: F) -> AtomResult<()>
    where
        F: FnOnce(&T, &Atom<T>) -> T,
    {
        self.apply(Next::With(Box::new(updater)), false, "silent_update")
    }

    /// Shallow-merge `partial` into a record value and update.
    pub fn merge<P: Serialize>(&self, partial: P) -> AtomResult<()> {
        self.locked(|| {
            let next = self.merged(&partial, "merge")?;
            self.update(next)
        })
    }

    /// Set a single top-level key and update.
    pub fn change<V: Serialize>(&self, key: &str, value: V) -> AtomResult<()> {
        let partial = single_key(key, &value)?;
        self.locked(|| {
            let next = self.merged(&partial, "change")?;
            self.update(next)
        })
    }

    /// Set a single top-level key without notifying anyone.
    pub fn silent_change<V: Serialize>(&self, key: &str, value: V) -> AtomResult<()> {
        let partial = single_key(key, &value)?;
        self.locked(|| {
            let next = self.merged(&partial, "silent_change")?;
            self.silent_update(next)
        })
    }

    /// Restore the default through the full update pipeline, then fire the
    /// reset event.
    pub fn reset(&self) -> AtomResult<()> {
        let _op = self.inner.op_lock.lock();
        self.ensure_alive("reset")?;

        self.update(self.fresh_default())?;
        debug!(key = %self.key(), "atom reset");
        self.inner
            .events
            .trigger(&self.inner.reset_topic, &AtomEvent::Reset(self.clone()));
        Ok(())
    }

    /// Restore the default without `before_update`, the update event or
    /// watchers. The reset event still fires.
    pub fn silent_reset(&self) -> AtomResult<()> {
        let _op = self.inner.op_lock.lock();
        self.ensure_alive("silent_reset")?;

        *self.inner.current.write() = self.fresh_default();
        debug!(key = %self.key(), "atom silently reset");
        self.inner
            .events
            .trigger(&self.inner.reset_topic, &AtomEvent::Reset(self.clone()));
        Ok(())
    }

    /// Fire the destroy event, drop all listeners and watchers, and leave
    /// the registry. Destroying twice is a no-op.
    pub fn destroy(&self) {
        let _op = self.inner.op_lock.lock();
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner
            .events
            .trigger(&self.inner.destroy_topic, &AtomEvent::Destroy(self.clone()));

        let topics = self.inner.events.unsubscribe_namespace(&self.inner.namespace);
        self.inner.watchers.write().clear();

        if let Some(store) = self.inner.store.upgrade() {
            store.remove_instance(self.key(), self.id());
        }
        debug!(key = %self.key(), topics, "atom destroyed");
    }

    /// Create an independent atom seeded with a copy of the current value.
    ///
    /// The copy gets the key `{key}Cloned{NNNN}` and keeps `before_update`,
    /// the custom getter and `on_update`. Actions and listeners are not
    /// carried over.
    pub fn clone_atom(&self) -> AtomResult<Atom<T>> {
        self.ensure_alive("clone")?;

        let store = self.inner.store.upgrade().unwrap_or_default();
        let key = store.unused_key(&format!("{}Cloned", self.key()));

        let options = AtomOptions {
            key,
            default: self.value().as_ref().clone(),
            before_update: self.inner.hooks.before_update.clone(),
            on_update: self.inner.hooks.on_update.clone(),
            getter: self.inner.hooks.getter.clone(),
            actions: IndexMap::new(),
        };

        let copy = Atom::new(&store, options)?;
        debug!(key = %self.key(), clone = %copy.key(), "atom cloned");
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Read a dotted path from the value, or delegate to the custom getter.
    pub fn get(&self, path: &str, default: Option<Value>) -> AtomResult<Option<Value>> {
        let current = self.value();
        if let Some(getter) = &self.inner.hooks.getter {
            return Ok(getter(path, default, &*current));
        }

        self.ensure_structural("get")?;
        let shape = value::to_json(&*current)?;
        Ok(value::get_path_or(&shape, path, default))
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Call `callback(new, old)` whenever the value at `path` changes during
    /// a notifying update. Not called with the current value.
    pub fn watch<F>(&self, path: impl Into<String>, callback: F) -> AtomResult<Subscription>
    where
        F: Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        self.ensure_alive("watch")?;
        self.ensure_structural("watch")?;

        let path = path.into();
        let id = SubscriptionId::new();
        self.inner
            .watchers
            .write()
            .entry(path.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        let watchers: Weak<Watchers> = Arc::downgrade(&self.inner.watchers);
        Ok(Subscription::new(id, move || {
            if let Some(shared) = watchers.upgrade() {
                let mut watchers = shared.write();
                let emptied = match watchers.get_mut(&path) {
                    Some(list) => {
                        list.retain(|(existing, _)| *existing != id);
                        list.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    watchers.shift_remove(&path);
                }
            }
        }))
    }

    /// Listen to every notifying update.
    pub fn on_change<F>(&self, callback: F) -> AtomResult<Subscription>
    where
        F: Fn(&T, &T, &Atom<T>) + Send + Sync + 'static,
    {
        self.ensure_alive("on_change")?;
        Ok(self.subscribe_update(Arc::new(callback)))
    }

    /// Listen to `reset` and `silent_reset`.
    pub fn on_reset<F>(&self, callback: F) -> AtomResult<Subscription>
    where
        F: Fn(&Atom<T>) + Send + Sync + 'static,
    {
        self.ensure_alive("on_reset")?;
        Ok(self.inner.events.subscribe(self.inner.reset_topic.clone(), move |event| {
            if let AtomEvent::Reset(atom) = event {
                callback(atom);
            }
        }))
    }

    /// Listen to `destroy`.
    pub fn on_destroy<F>(&self, callback: F) -> AtomResult<Subscription>
    where
        F: Fn(&Atom<T>) + Send + Sync + 'static,
    {
        self.ensure_alive("on_destroy")?;
        Ok(self.inner.events.subscribe(self.inner.destroy_topic.clone(), move |event| {
            if let AtomEvent::Destroy(atom) = event {
                callback(atom);
            }
        }))
    }

    /// Number of whole-value listeners, `on_update` included.
    pub fn listener_count(&self) -> usize {
        self.inner.events.subscriber_count(&self.inner.update_topic)
    }

    /// Number of watchers registered on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        self.inner.watchers.read().get(path).map_or(0, |list| list.len())
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Invoke a bound action with this atom as its receiver.
    pub fn dispatch(&self, action: &str, args: &[Value]) -> AtomResult<Value> {
        let bound = self
            .inner
            .actions
            .get(action)
            .cloned()
            .ok_or_else(|| AtomError::UnknownAction {
                key: self.key().to_string(),
                action: action.to_string(),
            })?;

        trace!(key = %self.key(), action, "dispatch");
        bound(self, args)
    }

    /// Whether an action with this name is bound.
    pub fn has_action(&self, action: &str) -> bool {
        self.inner.actions.contains_key(action)
    }

    /// Names of the bound actions in binding order.
    pub fn action_names(&self) -> Vec<&str> {
        self.inner.actions.keys().map(String::as_str).collect()
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    fn apply(&self, next: Next<'_, T>, notify: bool, operation: &'static str) -> AtomResult<()> {
        let _op = self.inner.op_lock.lock();
        self.ensure_alive(operation)?;

        let old = self.value();
        let resolved = match next {
            Next::Value(value) => {
                if self.is_same(&value, &old) {
                    return Ok(());
                }
                value
            }
            Next::With(updater) => Arc::new(updater(&*old, self)),
        };

        let stored = match &self.inner.hooks.before_update {
            Some(hook) => {
                let incoming = Arc::try_unwrap(resolved).unwrap_or_else(|arc| (*arc).clone());
                Arc::new(hook(incoming, &*old, self))
            }
            None => resolved,
        };

        // Shapes for the watcher diff are computed before anything is stored,
        // so a conversion failure leaves the atom untouched.
        let shapes = if notify && self.inner.kind.is_structural() && self.has_watchers() {
            Some((value::to_json(&*old)?, value::to_json(&*stored)?))
        } else {
            None
        };

        *self.inner.current.write() = Arc::clone(&stored);

        if !notify {
            trace!(key = %self.key(), operation, "stored silently");
            return Ok(());
        }

        let listeners = self.inner.events.trigger(
            &self.inner.update_topic,
            &AtomEvent::Update {
                new: Arc::clone(&stored),
                old,
                atom: self.clone(),
            },
        );
        trace!(key = %self.key(), operation, listeners, "update dispatched");

        if let Some((before, after)) = shapes {
            self.dispatch_watchers(&before, &after);
        }
        Ok(())
    }

    /// Run `f` while holding this atom's operation lock, so a read followed
    /// by an update cannot interleave with another thread's operation.
    pub(crate) fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _op = self.inner.op_lock.lock();
        f()
    }

    fn dispatch_watchers(&self, before: &Value, after: &Value) {
        let snapshot: Vec<(String, Vec<WatchCallback>)> = self
            .inner
            .watchers
            .read()
            .iter()
            .map(|(path, list)| (path.clone(), list.iter().map(|(_, cb)| Arc::clone(cb)).collect()))
            .collect();

        for (path, callbacks) in snapshot {
            let old_at = value::get_path(before, &path);
            let new_at = value::get_path(after, &path);
            if old_at == new_at {
                continue;
            }

            trace!(key = %self.key(), path = %path, watchers = callbacks.len(), "path changed");
            for callback in &callbacks {
                callback(new_at, old_at);
            }
        }
    }

    fn subscribe_update(&self, callback: ChangeCallback<T>) -> Subscription {
        self.inner.events.subscribe(self.inner.update_topic.clone(), move |event| {
            if let AtomEvent::Update { new, old, atom } = event {
                callback(new.as_ref(), old.as_ref(), atom);
            }
        })
    }

    fn merged<P: Serialize>(&self, partial: &P, operation: &'static str) -> AtomResult<T> {
        self.ensure_alive(operation)?;
        if self.inner.kind != ValueKind::Record {
            return Err(AtomError::invalid(self.key(), operation, self.inner.kind));
        }

        let current = value::to_json(&*self.value())?;
        let merged = value::shallow_merge(&current, value::to_json(partial)?)
            .ok_or_else(|| AtomError::invalid(self.key(), operation, self.inner.kind))?;
        value::from_json(merged)
    }

    fn is_same(&self, next: &Arc<T>, current: &Arc<T>) -> bool {
        Arc::ptr_eq(next, current) || (self.inner.kind == ValueKind::Scalar && next == current)
    }

    fn has_watchers(&self) -> bool {
        self.inner.watchers.read().values().any(|list| !list.is_empty())
    }

    fn fresh_default(&self) -> Arc<T> {
        Arc::new(self.inner.default.as_ref().clone())
    }

    fn ensure_alive(&self, operation: &'static str) -> AtomResult<()> {
        if self.is_destroyed() {
            return Err(AtomError::destroyed(self.key(), operation));
        }
        Ok(())
    }

    fn ensure_structural(&self, operation: &'static str) -> AtomResult<()> {
        if !self.inner.kind.is_structural() {
            return Err(AtomError::invalid(self.key(), operation, self.inner.kind));
        }
        Ok(())
    }
}

fn single_key<V: Serialize>(key: &str, value: &V) -> AtomResult<Value> {
    let mut fields = Map::new();
    fields.insert(key.to_string(), value::to_json(value)?);
    Ok(Value::Object(fields))
}

impl<T: AtomValue> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Atom<T>
where
    T: AtomValue + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("key", &self.inner.key)
            .field("kind", &self.inner.kind)
            .field("value", &self.value())
            .field("listeners", &self.listener_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
