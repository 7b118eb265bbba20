//! Context registry: the ambient storage behind every scope type.
//!
//! Each scope type is identified by a [`SlotKey`] and owns two LIFO stacks of
//! frames: one per thread, and one shared by the whole process. The
//! thread-local stacks need no synchronization. The process-wide map is
//! guarded by a mutex, and [`transact`] holds that lock for the whole
//! check-and-mutate step so two threads can never interleave a push or pop
//! on the same process-wide stack.
//!
//! Closures passed to [`transact`] must not call back into the registry.
//!
//! Tests that need a clean slate call [`reset_thread`] and [`reset_process`].

use crate::bounds::ScopeBounds;
use crate::scope::ScopeId;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

type Frame = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> Entry + Send + Sync>;

/// Identity of a scope type in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl SlotKey {
    #[must_use]
    pub fn of<K: 'static>() -> Self {
        SlotKey {
            type_id: TypeId::of::<K>(),
            type_name: std::any::type_name::<K>(),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

#[derive(Clone)]
struct Entry {
    id: ScopeId,
    frame: Frame,
}

struct Stack {
    type_name: &'static str,
    entries: Vec<Entry>,
    factory: Option<Factory>,
}

impl Stack {
    fn new(type_name: &'static str) -> Self {
        Stack {
            type_name,
            entries: Vec::new(),
            factory: None,
        }
    }

    fn is_unused(&self) -> bool {
        self.entries.is_empty() && self.factory.is_none()
    }
}

thread_local! {
    static THREAD_SLOTS: RefCell<HashMap<TypeId, Stack>> = RefCell::new(HashMap::new());
}

fn process_slots() -> MutexGuard<'static, HashMap<TypeId, Stack>> {
    static PROCESS_SLOTS: OnceLock<Mutex<HashMap<TypeId, Stack>>> = OnceLock::new();
    PROCESS_SLOTS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Mutable view over both stacks of one scope type.
pub struct SlotsMut<'a> {
    thread: &'a mut Stack,
    process: &'a mut Stack,
}

impl SlotsMut<'_> {
    fn stack(&self, bounds: ScopeBounds) -> &Stack {
        match bounds {
            ScopeBounds::Thread => &*self.thread,
            ScopeBounds::ProcessWide => &*self.process,
        }
    }

    fn stack_mut(&mut self, bounds: ScopeBounds) -> &mut Stack {
        match bounds {
            ScopeBounds::Thread => &mut *self.thread,
            ScopeBounds::ProcessWide => &mut *self.process,
        }
    }

    pub fn top<T: Any + Send + Sync>(&self, bounds: ScopeBounds) -> Option<Arc<T>> {
        let entry = self.stack(bounds).entries.last()?;
        Arc::downcast::<T>(entry.frame.clone()).ok()
    }

    pub fn depth(&self, bounds: ScopeBounds) -> usize {
        self.stack(bounds).entries.len()
    }

    pub fn push<T: Any + Send + Sync>(&mut self, bounds: ScopeBounds, id: ScopeId, frame: Arc<T>) {
        self.stack_mut(bounds).entries.push(Entry { id, frame });
    }

    /// Pops `id` if it is the top of its stack.
    ///
    /// Returns `Ok(true)` when popped, `Ok(false)` when `id` is not on the
    /// stack at all, and `Err(top)` when another entry sits above it.
    pub fn pop_if_top(&mut self, bounds: ScopeBounds, id: ScopeId) -> Result<bool, ScopeId> {
        let stack = self.stack_mut(bounds);
        match stack.entries.last().map(|entry| entry.id) {
            Some(top) if top == id => {
                stack.entries.pop();
                Ok(true)
            }
            Some(top) if stack.entries.iter().any(|entry| entry.id == id) => Err(top),
            _ => Ok(false),
        }
    }

    /// Removes `id` wherever it sits in its stack.
    pub fn remove(&mut self, bounds: ScopeBounds, id: ScopeId) -> bool {
        let stack = self.stack_mut(bounds);
        let before = stack.entries.len();
        stack.entries.retain(|entry| entry.id != id);
        stack.entries.len() != before
    }
}

/// Runs `f` with exclusive access to both stacks of `key`.
pub fn transact<R>(key: SlotKey, f: impl FnOnce(&mut SlotsMut<'_>) -> R) -> R {
    let mut process_map = process_slots();
    let process = process_map
        .entry(key.type_id)
        .or_insert_with(|| Stack::new(key.type_name));

    let mut f = Some(f);
    let mut result = None;
    // `try_with` fails only while the thread is tearing down its locals.
    let _ = THREAD_SLOTS.try_with(|cell| {
        if let Some(f) = f.take() {
            let mut thread_map = cell.borrow_mut();
            let thread = thread_map
                .entry(key.type_id)
                .or_insert_with(|| Stack::new(key.type_name));
            result = Some(f(&mut SlotsMut {
                thread,
                process: &mut *process,
            }));
            if thread_map.get(&key.type_id).is_some_and(Stack::is_unused) {
                thread_map.remove(&key.type_id);
            }
        }
    });

    let result = match (result, f.take()) {
        (Some(result), _) => result,
        (None, Some(f)) => {
            let mut detached = Stack::new(key.type_name);
            f(&mut SlotsMut {
                thread: &mut detached,
                process: &mut *process,
            })
        }
        (None, None) => unreachable!("transact closure consumed without producing a result"),
    };

    if process_map.get(&key.type_id).is_some_and(Stack::is_unused) {
        process_map.remove(&key.type_id);
    }
    result
}

/// Returns the frame on top of the `bounds` stack of `key`.
pub fn get<T: Any + Send + Sync>(key: SlotKey, bounds: ScopeBounds) -> Option<Arc<T>> {
    transact(key, |slots| slots.top::<T>(bounds))
}

pub fn depth(key: SlotKey, bounds: ScopeBounds) -> usize {
    transact(key, |slots| slots.depth(bounds))
}

/// Drops every frame on the `bounds` stack of `key`, returning how many were removed.
///
/// Frames are released after the registry lock, so payload destructors may
/// use scopes themselves.
pub fn clear(key: SlotKey, bounds: ScopeBounds) -> usize {
    let removed = transact(key, |slots| std::mem::take(&mut slots.stack_mut(bounds).entries));
    removed.len()
}

/// Registers the factory used to lazily create a process-wide default frame
/// when both stacks of `key` are empty.
pub fn set_default_factory<T, F>(key: SlotKey, factory: F)
where
    T: Any + Send + Sync,
    F: Fn() -> (ScopeId, Arc<T>) + Send + Sync + 'static,
{
    let factory: Factory = Arc::new(move || {
        let (id, frame) = factory();
        Entry { id, frame }
    });
    let replaced = process_slots()
        .entry(key.type_id)
        .or_insert_with(|| Stack::new(key.type_name))
        .factory
        .replace(factory);
    drop(replaced);
}

pub fn clear_default_factory(key: SlotKey) -> bool {
    let removed = {
        let mut process_map = process_slots();
        let Some(stack) = process_map.get_mut(&key.type_id) else {
            return false;
        };
        let removed = stack.factory.take();
        if stack.is_unused() {
            process_map.remove(&key.type_id);
        }
        removed
    };
    removed.is_some()
}

/// Creates the default frame for `key` if both stacks are empty and a
/// factory is registered. Returns `true` when a frame was pushed.
///
/// The factory runs outside the registry lock, so it may itself use scopes.
pub fn create_default(key: SlotKey) -> bool {
    let factory = transact(key, |slots| {
        if slots.depth(ScopeBounds::Thread) == 0 && slots.depth(ScopeBounds::ProcessWide) == 0 {
            slots.process.factory.clone()
        } else {
            None
        }
    });
    let Some(factory) = factory else {
        return false;
    };

    let entry = factory();
    // Another caller may have won the race; its loser is dropped unlocked.
    let lost = transact(key, |slots| {
        if slots.depth(ScopeBounds::Thread) == 0 && slots.depth(ScopeBounds::ProcessWide) == 0 {
            slots.process.entries.push(entry);
            None
        } else {
            Some(entry)
        }
    });
    lost.is_none()
}

/// Drops every thread-local frame of the calling thread.
pub fn reset_thread() {
    let removed = THREAD_SLOTS.try_with(|cell| std::mem::take(&mut *cell.borrow_mut()));
    drop(removed);
}

/// Drops every process-wide frame and default factory.
pub fn reset_process() {
    let removed = std::mem::take(&mut *process_slots());
    drop(removed);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub scope_type: String,
    pub bounds: ScopeBounds,
    pub depth: usize,
    pub scope_ids: Vec<ScopeId>,
    pub has_default: bool,
}

/// Point-in-time view of the registry as seen from the calling thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub slots: Vec<SlotSnapshot>,
}

impl RegistrySnapshot {
    /// Finds the slot whose scope type name contains `scope_type`.
    #[must_use]
    pub fn slot(&self, scope_type: &str, bounds: ScopeBounds) -> Option<&SlotSnapshot> {
        self.slots
            .iter()
            .find(|slot| slot.bounds == bounds && slot.scope_type.contains(scope_type))
    }

    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn snapshot_stack(stack: &Stack, bounds: ScopeBounds) -> SlotSnapshot {
    SlotSnapshot {
        scope_type: stack.type_name.to_string(),
        bounds,
        depth: stack.entries.len(),
        scope_ids: stack.entries.iter().map(|entry| entry.id).collect(),
        has_default: stack.factory.is_some(),
    }
}

#[must_use]
pub fn snapshot() -> RegistrySnapshot {
    let mut slots: Vec<SlotSnapshot> = process_slots()
        .values()
        .map(|stack| snapshot_stack(stack, ScopeBounds::ProcessWide))
        .collect();
    let _ = THREAD_SLOTS.try_with(|cell| {
        slots.extend(
            cell.borrow()
                .values()
                .map(|stack| snapshot_stack(stack, ScopeBounds::Thread)),
        );
    });
    slots.sort_by(|a, b| {
        a.scope_type
            .cmp(&b.scope_type)
            .then(a.bounds.is_process_wide().cmp(&b.bounds.is_process_wide()))
    });
    RegistrySnapshot { slots }
}
