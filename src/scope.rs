//! Ambient scopes with thread-local and process-wide visibility.
//!
//! A scope is opened with [`ScopeGuard::open`], becomes current immediately,
//! and stops being current when it is disposed (explicitly through
//! [`ScopeGuard::dispose`] or when the guard is dropped). How a new scope
//! relates to the one already current is decided by the nesting policy:
//!
//! | Alias | Policy | Opening while another scope is current |
//! |-------|--------|----------------------------------------|
//! | [`Scope<T>`] | [`Exclusive`] | fails with `InvalidNesting` |
//! | [`NestableScope<T>`] | [`Nestable`] | links a parent when bounds match; process-wide under thread fails |
//! | [`NestedScope<T>`] | [`Nested`] | always nests; thread scopes fall back to the process-wide parent |
//!
//! Nestable and nested scopes must be disposed in reverse order of creation.
//! Guards are not `Send`: a scope is disposed on the thread that opened it,
//! while its frame ([`ScopeRef`]) can be shared freely.

use crate::bounds::ScopeBounds;
use crate::error::{NestingViolation, ScopeError};
use crate::registry::{self, SlotKey, SlotsMut};
use crate::settings::AmbientSettings;
use serde::Serialize;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Process-unique identity of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ScopeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// The shared state of one open scope.
#[derive(Debug)]
pub struct ScopeFrame<T> {
    id: ScopeId,
    bounds: ScopeBounds,
    parent: Option<Weak<ScopeFrame<T>>>,
    disposed: AtomicBool,
    is_default: bool,
    value: T,
}

pub type ScopeRef<T> = Arc<ScopeFrame<T>>;

impl<T> ScopeFrame<T> {
    fn new(
        bounds: ScopeBounds,
        parent: Option<Weak<ScopeFrame<T>>>,
        value: T,
        is_default: bool,
    ) -> Self {
        ScopeFrame {
            id: ScopeId::next(),
            bounds,
            parent,
            disposed: AtomicBool::new(false),
            is_default,
            value,
        }
    }

    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[must_use]
    pub fn bounds(&self) -> ScopeBounds {
        self.bounds
    }

    /// The enclosing scope, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeRef<T>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// `true` for frames created by a registered default factory.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Walks the parent chain, nearest ancestor first.
    #[must_use]
    pub fn ancestors(&self) -> Ancestors<T> {
        Ancestors {
            next: self.parent(),
        }
    }
}

impl<T> Deref for ScopeFrame<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

pub struct Ancestors<T> {
    next: Option<ScopeRef<T>>,
}

impl<T> Iterator for Ancestors<T> {
    type Item = ScopeRef<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

mod private {
    pub trait Sealed {}
}

/// How a scope type treats an already-current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    Forbidden,
    SameBounds,
    Full,
}

pub trait NestingPolicy: private::Sealed + 'static {
    const NESTING: Nesting;
}

/// Only one scope of the type may be current at a time.
pub enum Exclusive {}
impl private::Sealed for Exclusive {}
impl NestingPolicy for Exclusive {
    const NESTING: Nesting = Nesting::Forbidden;
}

/// Scopes nest under a current scope of the same bounds.
pub enum Nestable {}
impl private::Sealed for Nestable {}
impl NestingPolicy for Nestable {
    const NESTING: Nesting = Nesting::SameBounds;
}

/// Scopes always nest, forming a LIFO stack per thread and per process.
pub enum Nested {}
impl private::Sealed for Nested {}
impl NestingPolicy for Nested {
    const NESTING: Nesting = Nesting::Full;
}

pub type Scope<T> = ScopeGuard<T, Exclusive>;
pub type NestableScope<T> = ScopeGuard<T, Nestable>;
pub type NestedScope<T> = ScopeGuard<T, Nested>;

/// Owner of an open scope. Disposing or dropping it closes the scope.
pub struct ScopeGuard<T, P>
where
    T: Send + Sync + 'static,
    P: NestingPolicy,
{
    frame: ScopeRef<T>,
    disposed: bool,
    _policy: PhantomData<P>,
    // Thread-bound frames live on the opening thread's stack.
    _not_send: PhantomData<*const ()>,
}

impl<T, P> ScopeGuard<T, P>
where
    T: Send + Sync + 'static,
    P: NestingPolicy,
{
    fn key() -> SlotKey {
        SlotKey::of::<ScopeGuard<T, P>>()
    }

    fn current_in(slots: &SlotsMut<'_>) -> Option<ScopeRef<T>> {
        match P::NESTING {
            Nesting::Forbidden | Nesting::SameBounds => slots
                .top::<ScopeFrame<T>>(ScopeBounds::ProcessWide)
                .or_else(|| slots.top(ScopeBounds::Thread)),
            Nesting::Full => slots
                .top::<ScopeFrame<T>>(ScopeBounds::Thread)
                .or_else(|| slots.top(ScopeBounds::ProcessWide)),
        }
    }

    /// Opens a scope and makes it current.
    ///
    /// # Errors
    /// Returns `ScopeError::InvalidNesting` when the nesting policy forbids
    /// opening a scope at this point.
    pub fn open(bounds: ScopeBounds, value: T) -> Result<Self, ScopeError> {
        let scope = std::any::type_name::<T>();
        let opened = registry::transact(Self::key(), |slots| {
            let parent = match P::NESTING {
                Nesting::Forbidden => {
                    if slots.depth(ScopeBounds::Thread) > 0
                        || slots.depth(ScopeBounds::ProcessWide) > 0
                    {
                        Err(NestingViolation::NestingNotAllowed)
                    } else {
                        Ok(None)
                    }
                }
                Nesting::SameBounds => match Self::current_in(slots) {
                    Some(current) if current.bounds().is_thread() && bounds.is_process_wide() => {
                        Err(NestingViolation::ProcessWideUnderThread)
                    }
                    Some(current) if current.bounds() == bounds => {
                        Ok(Some(Arc::downgrade(&current)))
                    }
                    _ => Ok(None),
                },
                Nesting::Full => {
                    let parent = match bounds {
                        ScopeBounds::Thread => slots
                            .top::<ScopeFrame<T>>(ScopeBounds::Thread)
                            .or_else(|| slots.top(ScopeBounds::ProcessWide)),
                        ScopeBounds::ProcessWide => {
                            slots.top::<ScopeFrame<T>>(ScopeBounds::ProcessWide)
                        }
                    };
                    Ok(parent.map(|parent| Arc::downgrade(&parent)))
                }
            };

            match parent {
                Ok(parent) => {
                    let frame = Arc::new(ScopeFrame::new(bounds, parent, value, false));
                    slots.push(bounds, frame.id, frame.clone());
                    Ok(frame)
                }
                Err(reason) => Err((reason, value)),
            }
        });

        let frame = match opened {
            Ok(frame) => frame,
            Err((reason, value)) => {
                // The payload's own drop may use scopes, so it runs outside the registry.
                drop(value);
                return Err(ScopeError::InvalidNesting { scope, reason });
            }
        };

        log::trace!(
            "opened {} {} of `{scope}` (parent: {:?})",
            frame.bounds,
            frame.id,
            frame.parent().map(|parent| parent.id)
        );
        Ok(ScopeGuard {
            frame,
            disposed: false,
            _policy: PhantomData,
            _not_send: PhantomData,
        })
    }

    /// Opens a scope with the configured default bounds.
    ///
    /// # Errors
    /// See [`ScopeGuard::open`].
    pub fn open_default(value: T) -> Result<Self, ScopeError> {
        Self::open(AmbientSettings::current().default_bounds, value)
    }

    /// The scope currently visible from the calling thread.
    #[must_use]
    pub fn current() -> Option<ScopeRef<T>> {
        let key = Self::key();
        let current = registry::transact(key, |slots| Self::current_in(slots));
        if current.is_some() || P::NESTING != Nesting::Full {
            return current;
        }
        if registry::create_default(key) {
            log::debug!("created default scope for `{}`", std::any::type_name::<T>());
        }
        registry::transact(key, |slots| Self::current_in(slots))
    }

    /// The top of one specific stack, ignoring precedence and defaults.
    #[must_use]
    pub fn current_for(bounds: ScopeBounds) -> Option<ScopeRef<T>> {
        registry::get::<ScopeFrame<T>>(Self::key(), bounds)
    }

    #[must_use]
    pub fn depth(bounds: ScopeBounds) -> usize {
        registry::depth(Self::key(), bounds)
    }

    #[must_use]
    pub fn frame(&self) -> &ScopeRef<T> {
        &self.frame
    }

    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.frame.id
    }

    #[must_use]
    pub fn bounds(&self) -> ScopeBounds {
        self.frame.bounds
    }

    #[must_use]
    pub fn parent(&self) -> Option<ScopeRef<T>> {
        self.frame.parent()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        Self::current().is_some_and(|current| current.id == self.frame.id)
    }

    /// Closes the scope. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `ScopeError::OutOfOrderDisposal` when a scope opened after this
    /// one is still open on the same stack. The scope stays open in that case.
    pub fn dispose(&mut self) -> Result<(), ScopeError> {
        if self.disposed {
            return Ok(());
        }

        let bounds = self.frame.bounds;
        let id = self.frame.id;
        let popped = registry::transact(Self::key(), |slots| match P::NESTING {
            // An exclusive scope only clears the slot if it still holds it.
            Nesting::Forbidden => {
                let _ = slots.pop_if_top(bounds, id);
                Ok(())
            }
            Nesting::SameBounds | Nesting::Full => slots.pop_if_top(bounds, id).map(|_| ()),
        });

        if let Err(top) = popped {
            return Err(ScopeError::OutOfOrderDisposal {
                scope: std::any::type_name::<T>(),
                disposed: id,
                top,
            });
        }

        self.mark_disposed();
        log::trace!("disposed {bounds} {id} of `{}`", std::any::type_name::<T>());
        Ok(())
    }

    /// Disposes the scope even when it is not on top of its stack, logging
    /// the violation and removing the stale frame.
    pub(crate) fn force_dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(err) = self.dispose() {
            log::error!("{err}; removing it from the {} stack", self.frame.bounds);
            let bounds = self.frame.bounds;
            let id = self.frame.id;
            registry::transact(Self::key(), |slots| slots.remove(bounds, id));
            self.mark_disposed();
        }
    }

    fn mark_disposed(&mut self) {
        self.disposed = true;
        self.frame.disposed.store(true, Ordering::Release);
    }
}

impl<T> ScopeGuard<T, Nested>
where
    T: Send + Sync + 'static,
{
    /// Registers a factory that lazily creates a process-wide default scope
    /// the first time [`ScopeGuard::current`] finds no scope at all.
    ///
    /// The default frame is owned by the registry and stays open until
    /// [`registry::reset_process`] or [`registry::clear`] removes it.
    pub fn register_default<F>(factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        registry::set_default_factory(Self::key(), move || {
            let frame = Arc::new(ScopeFrame::new(ScopeBounds::ProcessWide, None, factory(), true));
            (frame.id, frame)
        });
    }

    pub fn clear_default() -> bool {
        registry::clear_default_factory(Self::key())
    }
}

impl<T, P> Deref for ScopeGuard<T, P>
where
    T: Send + Sync + 'static,
    P: NestingPolicy,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.frame.value
    }
}

impl<T, P> fmt::Debug for ScopeGuard<T, P>
where
    T: Send + Sync + 'static,
    P: NestingPolicy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &std::any::type_name::<T>())
            .field("nesting", &P::NESTING)
            .field("id", &self.frame.id)
            .field("bounds", &self.frame.bounds)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl<T, P> Drop for ScopeGuard<T, P>
where
    T: Send + Sync + 'static,
    P: NestingPolicy,
{
    fn drop(&mut self) {
        self.force_dispose();
    }
}
