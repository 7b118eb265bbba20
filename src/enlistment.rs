//! Enlistment scopes: collect items in the current scope and hand them to
//! the outermost scope for finalization.
//!
//! Every enlistment scope is a [`NestedScope`] whose payload is an
//! [`Enlistment`]. When a child scope is disposed its items move to the
//! parent, so finalization happens exactly once, at the outermost scope:
//!
//! - [`EnlistmentScope`] releases the items back to the caller.
//! - [`UnitOfWork`] hands them to its [`WorkProcessor`] when
//!   [`UnitOfWork::complete`] is called. Disposal never completes implicitly.
//! - [`DisposableContext`] disposes every item, collecting failures instead of
//!   stopping at the first one.

use crate::bounds::ScopeBounds;
use crate::error::{BoxError, DisposalFailure, EnlistmentError, ScopeError};
use crate::scope::{NestedScope, ScopeFrame, ScopeRef};
use crate::settings::AmbientSettings;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct State<I> {
    items: Vec<I>,
    closed: bool,
}

/// Ordered collection of enlisted items, embedded as a scope payload.
///
/// `K` only distinguishes scope kinds so that, for example, two unit of work
/// types with the same item type keep separate stacks.
pub struct Enlistment<I, K = ()> {
    state: Mutex<State<I>>,
    _kind: PhantomData<fn() -> K>,
}

impl<I, K> Enlistment<I, K> {
    fn new() -> Self {
        Enlistment {
            state: Mutex::new(State {
                items: Vec::new(),
                closed: false,
            }),
            _kind: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<I>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disposed_error() -> EnlistmentError {
        EnlistmentError::ObjectDisposed {
            scope: std::any::type_name::<Self>(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) -> Vec<I> {
        let mut state = self.lock();
        state.closed = true;
        std::mem::take(&mut state.items)
    }

    /// Appends `items`, handing them back if this enlistment is already closed.
    fn absorb(&self, items: Vec<I>) -> Result<(), Vec<I>> {
        let mut state = self.lock();
        if state.closed {
            return Err(items);
        }
        state.items.extend(items);
        Ok(())
    }

    fn contains(&self, item: &I) -> bool
    where
        I: PartialEq,
    {
        self.lock().items.contains(item)
    }
}

impl<I, K> fmt::Debug for Enlistment<I, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Enlistment")
            .field("items", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<I, K> ScopeFrame<Enlistment<I, K>> {
    /// Appends items to this scope.
    ///
    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after the scope is disposed.
    pub fn enlist(&self, items: impl IntoIterator<Item = I>) -> Result<(), EnlistmentError> {
        let mut state = self.value().lock();
        if state.closed {
            return Err(Enlistment::<I, K>::disposed_error());
        }
        state.items.extend(items);
        Ok(())
    }

    /// `true` if `item` is enlisted here or in any ancestor scope.
    ///
    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after the scope is disposed.
    pub fn is_enlisted(&self, item: &I) -> Result<bool, EnlistmentError>
    where
        I: PartialEq,
    {
        if self.value().is_closed() {
            return Err(Enlistment::<I, K>::disposed_error());
        }
        Ok(self.value().contains(item)
            || self.ancestors().any(|ancestor| ancestor.value().contains(item)))
    }

    /// Items enlisted directly in this scope, in enlistment order.
    ///
    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after the scope is disposed.
    pub fn enlisted(&self) -> Result<Vec<I>, EnlistmentError>
    where
        I: Clone,
    {
        let state = self.value().lock();
        if state.closed {
            return Err(Enlistment::<I, K>::disposed_error());
        }
        Ok(state.items.clone())
    }
}

pub struct EnlistmentScope<I, K = ()>
where
    I: Send + 'static,
    K: 'static,
{
    scope: NestedScope<Enlistment<I, K>>,
}

impl<I, K> EnlistmentScope<I, K>
where
    I: Send + 'static,
    K: 'static,
{
    /// # Errors
    /// Propagates scope nesting errors.
    pub fn open(bounds: ScopeBounds) -> Result<Self, ScopeError> {
        Ok(EnlistmentScope {
            scope: NestedScope::open(bounds, Enlistment::new())?,
        })
    }

    #[must_use]
    pub fn current() -> Option<ScopeRef<Enlistment<I, K>>> {
        NestedScope::<Enlistment<I, K>>::current()
    }

    #[must_use]
    pub fn frame(&self) -> &ScopeRef<Enlistment<I, K>> {
        self.scope.frame()
    }

    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.scope.parent().is_some()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal.
    pub fn enlist(&self, items: impl IntoIterator<Item = I>) -> Result<(), EnlistmentError> {
        self.frame().enlist(items)
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal.
    pub fn is_enlisted(&self, item: &I) -> Result<bool, EnlistmentError>
    where
        I: PartialEq,
    {
        self.frame().is_enlisted(item)
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal.
    pub fn enlisted(&self) -> Result<Vec<I>, EnlistmentError>
    where
        I: Clone,
    {
        self.frame().enlisted()
    }

    /// Closes the scope.
    ///
    /// A child scope moves its items to the parent and returns an empty
    /// vector. The outermost scope returns its items so the caller can
    /// finalize them. Calling it again returns an empty vector.
    ///
    /// # Errors
    /// Returns `EnlistmentError::Scope` if a nested scope is still open.
    pub fn dispose(&mut self) -> Result<Vec<I>, EnlistmentError> {
        if self.scope.is_disposed() {
            return Ok(Vec::new());
        }
        self.scope.dispose()?;
        Ok(self.release())
    }

    /// Disposes the scope even while a nested scope is still open. The items
    /// are closed and handed on exactly as in [`EnlistmentScope::dispose`],
    /// so they are never freed unseen along with the frame.
    fn force_close(&mut self) -> Vec<I> {
        if self.scope.is_disposed() {
            return Vec::new();
        }
        self.scope.force_dispose();
        self.release()
    }

    fn release(&self) -> Vec<I> {
        let items = self.frame().value().close();
        let Some(parent) = self.scope.parent() else {
            return items;
        };

        let count = items.len();
        match parent.value().absorb(items) {
            Ok(()) => {
                log::debug!(
                    "moved {count} enlisted items from {} to {}",
                    self.scope.id(),
                    parent.id()
                );
                Vec::new()
            }
            Err(items) => {
                log::warn!(
                    "parent {} of {} is already closed; releasing {count} items here",
                    parent.id(),
                    self.scope.id()
                );
                items
            }
        }
    }
}

impl<I, K> Drop for EnlistmentScope<I, K>
where
    I: Send + 'static,
    K: 'static,
{
    fn drop(&mut self) {
        let items = self.force_close();
        if !items.is_empty() {
            log::debug!("dropping {} released items of {}", items.len(), self.scope.id());
        }
    }
}

/// Finalizes the items of an outermost [`UnitOfWork`].
pub trait WorkProcessor: Send + 'static {
    type Item: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn process(&mut self, items: Vec<Self::Item>) -> Result<(), Self::Error>;
}

pub struct UnitOfWork<P: WorkProcessor> {
    scope: EnlistmentScope<P::Item, P>,
    processor: P,
    completed: bool,
}

impl<P: WorkProcessor> UnitOfWork<P> {
    /// # Errors
    /// Propagates scope nesting errors.
    pub fn open(bounds: ScopeBounds, processor: P) -> Result<Self, ScopeError> {
        Ok(UnitOfWork {
            scope: EnlistmentScope::open(bounds)?,
            processor,
            completed: false,
        })
    }

    #[must_use]
    pub fn current() -> Option<ScopeRef<Enlistment<P::Item, P>>> {
        EnlistmentScope::<P::Item, P>::current()
    }

    #[must_use]
    pub fn frame(&self) -> &ScopeRef<Enlistment<P::Item, P>> {
        self.scope.frame()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.scope.has_parent()
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal, or
    /// `EnlistmentError::AlreadyCompleted` once the outermost unit has been
    /// processed.
    pub fn enlist(&self, items: impl IntoIterator<Item = P::Item>) -> Result<(), EnlistmentError> {
        match self.scope.enlist(items) {
            Err(EnlistmentError::ObjectDisposed { .. }) if !self.scope.is_disposed() => {
                Err(EnlistmentError::AlreadyCompleted {
                    scope: std::any::type_name::<Self>(),
                })
            }
            other => other,
        }
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal, or once the
    /// outermost unit has been completed.
    pub fn is_enlisted(&self, item: &P::Item) -> Result<bool, EnlistmentError>
    where
        P::Item: PartialEq,
    {
        self.scope.is_enlisted(item)
    }

    /// Completes the unit of work.
    ///
    /// The outermost unit runs the processor once with every item enlisted
    /// in it and its disposed children, then stops accepting items. A child
    /// only records completion; its items reach the parent when it is
    /// disposed. A child still open when its parent completes gets its items
    /// back at disposal.
    ///
    /// # Errors
    /// Returns `ObjectDisposed` after disposal, `AlreadyCompleted` on a second
    /// call, or `Processing` when the processor fails.
    pub fn complete(&mut self) -> Result<(), EnlistmentError> {
        let scope = std::any::type_name::<Self>();
        if self.scope.is_disposed() {
            return Err(EnlistmentError::ObjectDisposed { scope });
        }
        if self.completed {
            return Err(EnlistmentError::AlreadyCompleted { scope });
        }
        self.completed = true;

        if self.scope.has_parent() {
            log::debug!("{} completed; items move to its parent on dispose", self.frame().id());
            return Ok(());
        }

        let items = self.frame().value().close();
        log::debug!("processing {} items of {}", items.len(), self.frame().id());
        self.processor
            .process(items)
            .map_err(|source| EnlistmentError::Processing {
                scope,
                source: Box::new(source),
            })
    }

    /// Closes the unit of work without completing it.
    ///
    /// # Errors
    /// Returns `EnlistmentError::Scope` if a nested scope is still open, or
    /// `EnlistmentError::ParentClosed` if this child's items could not join a
    /// parent that was already completed. The unit is still disposed then.
    pub fn dispose(&mut self) -> Result<(), EnlistmentError> {
        if self.scope.is_disposed() {
            return Ok(());
        }
        let discarded = self.scope.dispose()?;
        if !discarded.is_empty() && self.scope.has_parent() {
            return Err(EnlistmentError::ParentClosed {
                scope: std::any::type_name::<Self>(),
                discarded: discarded.len(),
            });
        }
        if !discarded.is_empty() && AmbientSettings::current().work.warn_on_abandon {
            log::warn!(
                "`{}` {} disposed without completion; discarding {} items",
                std::any::type_name::<Self>(),
                self.frame().id(),
                discarded.len()
            );
        }
        Ok(())
    }
}

impl<P: WorkProcessor> Drop for UnitOfWork<P> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::error!("failed to dispose unit of work: {err}");
        }
    }
}

/// A resource released by a [`DisposableContext`].
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> Result<(), BoxError>;
}

impl<F> Disposable for F
where
    F: Fn() -> Result<(), BoxError> + Send + Sync,
{
    fn dispose(&self) -> Result<(), BoxError> {
        self()
    }
}

/// Shared handle to an enlisted disposable. Equality is identity.
#[derive(Clone)]
pub struct DisposableRef(Arc<dyn Disposable>);

impl DisposableRef {
    pub fn new<D: Disposable + 'static>(disposable: D) -> Self {
        DisposableRef(Arc::new(disposable))
    }

    pub fn from_arc(disposable: Arc<dyn Disposable>) -> Self {
        DisposableRef(disposable)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl<D: Disposable + 'static> From<Arc<D>> for DisposableRef {
    fn from(disposable: Arc<D>) -> Self {
        DisposableRef(disposable)
    }
}

impl PartialEq for DisposableRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for DisposableRef {}

impl fmt::Debug for DisposableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisposableRef({:p})", self.addr())
    }
}

/// Kind marker keeping disposable contexts on their own stacks.
pub enum DisposableKind {}

#[derive(Debug, thiserror::Error)]
#[error("disposable panicked: {0}")]
struct PanicError(String);

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Disposes every item in order, even when some of them fail or panic.
///
/// # Errors
/// Returns `EnlistmentError::AggregateDisposal` listing every failure.
pub fn dispose_all(items: Vec<DisposableRef>) -> Result<(), EnlistmentError> {
    let attempted = items.len();
    let mut failures = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let source: BoxError = match panic::catch_unwind(AssertUnwindSafe(|| item.0.dispose())) {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(payload) => Box::new(PanicError(panic_message(payload.as_ref()))),
        };
        log::error!("disposable #{index} failed: {source}");
        failures.push(DisposalFailure { index, source });
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(EnlistmentError::AggregateDisposal {
            attempted,
            failures,
        })
    }
}

pub struct DisposableContext {
    scope: EnlistmentScope<DisposableRef, DisposableKind>,
}

impl DisposableContext {
    /// # Errors
    /// Propagates scope nesting errors.
    pub fn open(bounds: ScopeBounds) -> Result<Self, ScopeError> {
        Ok(DisposableContext {
            scope: EnlistmentScope::open(bounds)?,
        })
    }

    #[must_use]
    pub fn current() -> Option<ScopeRef<Enlistment<DisposableRef, DisposableKind>>> {
        EnlistmentScope::<DisposableRef, DisposableKind>::current()
    }

    #[must_use]
    pub fn frame(&self) -> &ScopeRef<Enlistment<DisposableRef, DisposableKind>> {
        self.scope.frame()
    }

    /// Enlists a disposable and returns the handle used to query it.
    ///
    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal.
    pub fn enlist(&self, item: impl Into<DisposableRef>) -> Result<DisposableRef, EnlistmentError> {
        let item = item.into();
        self.scope.enlist([item.clone()])?;
        Ok(item)
    }

    /// Enlists into whichever context is current on this thread.
    /// Returns `false` when there is none.
    ///
    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` if the current context is closing.
    pub fn enlist_current(item: impl Into<DisposableRef>) -> Result<bool, EnlistmentError> {
        match Self::current() {
            Some(frame) => frame.enlist([item.into()]).map(|()| true),
            None => Ok(false),
        }
    }

    /// # Errors
    /// Returns `EnlistmentError::ObjectDisposed` after disposal.
    pub fn is_enlisted(&self, item: &DisposableRef) -> Result<bool, EnlistmentError> {
        self.scope.is_enlisted(item)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// Closes the context. The outermost context disposes every enlisted item.
    ///
    /// # Errors
    /// Returns `EnlistmentError::Scope` if a nested scope is still open, or
    /// `EnlistmentError::AggregateDisposal` if any item failed to dispose.
    pub fn dispose(&mut self) -> Result<(), EnlistmentError> {
        if self.scope.is_disposed() {
            return Ok(());
        }
        let items = self.scope.dispose()?;
        dispose_all(items)
    }
}

impl Drop for DisposableContext {
    fn drop(&mut self) {
        let result = match self.dispose() {
            Err(EnlistmentError::Scope(err)) => {
                log::error!("{err}; disposing the context's items now");
                dispose_all(self.scope.force_close())
            }
            other => other,
        };
        if let Err(err) = result {
            log::error!("failed to dispose context: {err}");
        }
    }
}
