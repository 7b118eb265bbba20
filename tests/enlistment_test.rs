// Enlistment scope, unit of work and disposable context tests.

use ambient_core::enlistment::DisposableKind;
use ambient_core::error::{BoxError, EnlistmentError, ScopeError};
use ambient_core::{
    DisposableContext, DisposableRef, Disposable, EnlistmentScope, ScopeBounds, UnitOfWork,
    WorkProcessor,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

/// Disposable that counts its disposals and optionally fails.
#[derive(Default)]
struct Tracker {
    disposed: AtomicUsize,
    fail: bool,
}

impl Tracker {
    fn failing() -> Self {
        Tracker {
            disposed: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Disposable for Tracker {
    fn dispose(&self) -> Result<(), BoxError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Box::new(TestError("tracker refused to dispose".into())));
        }
        Ok(())
    }
}

struct Panicker;

impl Disposable for Panicker {
    fn dispose(&self) -> Result<(), BoxError> {
        panic!("disposal exploded");
    }
}

enum Plain {}

#[test]
fn test_child_items_move_to_parent() {
    let mut outer = EnlistmentScope::<String, Plain>::open(ScopeBounds::Thread).unwrap();
    let mut inner = EnlistmentScope::<String, Plain>::open(ScopeBounds::Thread).unwrap();

    inner.enlist(["foo".to_string()]).unwrap();
    assert!(!outer.is_enlisted(&"foo".to_string()).unwrap());
    assert!(inner.is_enlisted(&"foo".to_string()).unwrap());

    let released = inner.dispose().unwrap();
    assert!(released.is_empty());
    assert!(outer.is_enlisted(&"foo".to_string()).unwrap());

    let released = outer.dispose().unwrap();
    assert_eq!(released, vec!["foo".to_string()]);
}

enum Ancestry {}

#[test]
fn test_is_enlisted_checks_ancestors() {
    let outer = EnlistmentScope::<u32, Ancestry>::open(ScopeBounds::Thread).unwrap();
    outer.enlist([1, 2]).unwrap();
    let inner = EnlistmentScope::<u32, Ancestry>::open(ScopeBounds::Thread).unwrap();

    assert!(inner.is_enlisted(&2).unwrap());
    assert!(!inner.is_enlisted(&3).unwrap());
    assert_eq!(
        EnlistmentScope::<u32, Ancestry>::current().unwrap().id(),
        inner.frame().id()
    );
}

enum Duplicates {}

#[test]
fn test_duplicates_are_kept_in_order() {
    let mut scope = EnlistmentScope::<u32, Duplicates>::open(ScopeBounds::Thread).unwrap();
    scope.enlist([3, 1, 3]).unwrap();
    scope.enlist([1]).unwrap();
    assert_eq!(scope.enlisted().unwrap(), vec![3, 1, 3, 1]);
    assert_eq!(scope.dispose().unwrap(), vec![3, 1, 3, 1]);
}

enum AfterDispose {}

#[test]
fn test_enlist_after_dispose_is_object_disposed() {
    let mut scope = EnlistmentScope::<u32, AfterDispose>::open(ScopeBounds::Thread).unwrap();
    let frame = scope.frame().clone();
    scope.dispose().unwrap();

    assert!(matches!(
        scope.enlist([1]),
        Err(EnlistmentError::ObjectDisposed { .. })
    ));
    assert!(matches!(
        frame.is_enlisted(&1),
        Err(EnlistmentError::ObjectDisposed { .. })
    ));
    // Disposing again is a no-op.
    assert!(scope.dispose().unwrap().is_empty());
}

enum OutOfOrder {}

#[test]
fn test_enlistment_out_of_order_keeps_items() {
    let mut outer = EnlistmentScope::<u32, OutOfOrder>::open(ScopeBounds::Thread).unwrap();
    outer.enlist([7]).unwrap();
    let mut inner = EnlistmentScope::<u32, OutOfOrder>::open(ScopeBounds::Thread).unwrap();

    assert!(matches!(
        outer.dispose(),
        Err(EnlistmentError::Scope(ScopeError::OutOfOrderDisposal { .. }))
    ));
    assert!(outer.is_enlisted(&7).unwrap());

    inner.dispose().unwrap();
    assert_eq!(outer.dispose().unwrap(), vec![7]);
}

enum Dropped {}

#[test]
fn test_dropping_child_transfers_items() {
    let mut outer = EnlistmentScope::<u32, Dropped>::open(ScopeBounds::Thread).unwrap();
    {
        let inner = EnlistmentScope::<u32, Dropped>::open(ScopeBounds::Thread).unwrap();
        inner.enlist([42]).unwrap();
    }
    assert_eq!(outer.dispose().unwrap(), vec![42]);
}

struct Recorder {
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl WorkProcessor for Recorder {
    type Item = String;
    type Error = TestError;

    fn process(&mut self, items: Vec<String>) -> Result<(), TestError> {
        self.batches.lock().unwrap().push(items);
        Ok(())
    }
}

fn recorder() -> (Recorder, Arc<Mutex<Vec<Vec<String>>>>) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    (
        Recorder {
            batches: Arc::clone(&batches),
        },
        batches,
    )
}

#[test]
fn test_nested_unit_of_work_processes_once_at_outermost() {
    let (outer_processor, batches) = recorder();
    let (inner_processor, inner_batches) = recorder();

    let mut outer = UnitOfWork::open(ScopeBounds::Thread, outer_processor).unwrap();
    outer.enlist(["a".to_string()]).unwrap();
    {
        let mut inner = UnitOfWork::open(ScopeBounds::Thread, inner_processor).unwrap();
        assert!(inner.has_parent());
        inner.enlist(["foo".to_string()]).unwrap();
        inner.complete().unwrap();
        assert!(inner.is_completed());
        inner.dispose().unwrap();
    }
    assert!(inner_batches.lock().unwrap().is_empty());
    assert!(outer.is_enlisted(&"foo".to_string()).unwrap());

    outer.complete().unwrap();
    outer.dispose().unwrap();

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec!["a".to_string(), "foo".to_string()]);
}

struct Counter {
    calls: Arc<AtomicUsize>,
}

impl WorkProcessor for Counter {
    type Item = u32;
    type Error = TestError;

    fn process(&mut self, _items: Vec<u32>) -> Result<(), TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_unit_of_work_completes_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut work = UnitOfWork::open(
        ScopeBounds::Thread,
        Counter {
            calls: Arc::clone(&calls),
        },
    )
    .unwrap();
    work.enlist([1, 2, 3]).unwrap();

    work.complete().unwrap();
    assert!(matches!(
        work.complete(),
        Err(EnlistmentError::AlreadyCompleted { .. })
    ));
    work.dispose().unwrap();
    assert!(matches!(
        work.complete(),
        Err(EnlistmentError::ObjectDisposed { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispose_does_not_complete_unit_of_work() {
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let work = UnitOfWork::open(
            ScopeBounds::Thread,
            Counter {
                calls: Arc::clone(&calls),
            },
        )
        .unwrap();
        work.enlist([1]).unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(UnitOfWork::<Counter>::current().is_none());
}

struct Failing;

impl WorkProcessor for Failing {
    type Item = u8;
    type Error = TestError;

    fn process(&mut self, _items: Vec<u8>) -> Result<(), TestError> {
        Err(TestError("storage offline".into()))
    }
}

#[test]
fn test_processing_failure_is_reported() {
    let mut work = UnitOfWork::open(ScopeBounds::Thread, Failing).unwrap();
    work.enlist([1]).unwrap();
    match work.complete() {
        Err(EnlistmentError::Processing { source, .. }) => {
            assert_eq!(source.to_string(), "storage offline");
        }
        other => panic!("Expected Processing error, got {other:?}"),
    }
    assert!(work.is_completed());
}

#[test]
fn test_fail_safe_disposal_disposes_everything() {
    let trackers = [
        Arc::new(Tracker::default()),
        Arc::new(Tracker::failing()),
        Arc::new(Tracker::default()),
        Arc::new(Tracker::default()),
    ];

    let mut context = DisposableContext::open(ScopeBounds::Thread).unwrap();
    for tracker in &trackers {
        context.enlist(Arc::clone(tracker)).unwrap();
    }

    match context.dispose() {
        Err(EnlistmentError::AggregateDisposal {
            attempted,
            failures,
        }) => {
            assert_eq!(attempted, 4);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert_eq!(failures[0].source.to_string(), "tracker refused to dispose");
        }
        other => panic!("Expected AggregateDisposal, got {other:?}"),
    }
    for tracker in &trackers {
        assert_eq!(tracker.count(), 1);
    }
}

#[test]
fn test_panicking_disposable_does_not_stop_the_rest() {
    let after = Arc::new(Tracker::default());
    let mut context = DisposableContext::open(ScopeBounds::Thread).unwrap();
    context.enlist(Arc::new(Panicker)).unwrap();
    context.enlist(Arc::clone(&after)).unwrap();

    let err = context.dispose().unwrap_err();
    assert!(matches!(
        err,
        EnlistmentError::AggregateDisposal { ref failures, .. } if failures.len() == 1
    ));
    assert_eq!(after.count(), 1);
}

#[test]
fn test_nested_context_disposes_once_at_outermost() {
    let tracker = Arc::new(Tracker::default());

    let mut outer = DisposableContext::open(ScopeBounds::Thread).unwrap();
    let mut inner = DisposableContext::open(ScopeBounds::Thread).unwrap();
    let handle = inner.enlist(Arc::clone(&tracker)).unwrap();

    inner.dispose().unwrap();
    assert_eq!(tracker.count(), 0);
    assert!(outer.is_enlisted(&handle).unwrap());

    outer.dispose().unwrap();
    assert_eq!(tracker.count(), 1);
}

#[test]
fn test_enlist_current_uses_ambient_context() {
    let tracker = Arc::new(Tracker::default());
    assert!(!DisposableContext::enlist_current(Arc::clone(&tracker)).unwrap());

    {
        let _context = DisposableContext::open(ScopeBounds::Thread).unwrap();
        assert!(DisposableContext::enlist_current(Arc::clone(&tracker)).unwrap());
        let current = DisposableContext::current().unwrap();
        assert_eq!(current.value().len(), 1);
    }
    assert_eq!(tracker.count(), 1);
}

#[test]
fn test_disposable_ref_equality_is_identity() {
    let tracker = Arc::new(Tracker::default());
    let a = DisposableRef::from(Arc::clone(&tracker));
    let b = DisposableRef::from(Arc::clone(&tracker));
    let other = DisposableRef::new(Tracker::default());
    assert_eq!(a, b);
    assert_ne!(a, other);
}

#[test]
fn test_disposable_kind_keeps_contexts_separate() {
    let _context = DisposableContext::open(ScopeBounds::Thread).unwrap();
    assert!(EnlistmentScope::<DisposableRef, DisposableKind>::current().is_some());
    assert!(EnlistmentScope::<DisposableRef, ()>::current().is_none());
}

#[test]
fn test_dropping_outer_context_first_still_disposes_its_items() {
    let outer_item = Arc::new(Tracker::default());
    let inner_item = Arc::new(Tracker::default());

    let outer = DisposableContext::open(ScopeBounds::Thread).unwrap();
    outer.enlist(Arc::clone(&outer_item)).unwrap();
    let inner = DisposableContext::open(ScopeBounds::Thread).unwrap();
    inner.enlist(Arc::clone(&inner_item)).unwrap();

    drop(outer);
    assert_eq!(outer_item.count(), 1);
    assert_eq!(inner_item.count(), 0);

    drop(inner);
    assert_eq!(inner_item.count(), 1);
    assert_eq!(outer_item.count(), 1);
    assert!(DisposableContext::current().is_none());
}

enum ForcedOuter {}

#[test]
fn test_dropping_outer_enlistment_first_closes_it() {
    let outer = EnlistmentScope::<u32, ForcedOuter>::open(ScopeBounds::Thread).unwrap();
    outer.enlist([1]).unwrap();
    let mut inner = EnlistmentScope::<u32, ForcedOuter>::open(ScopeBounds::Thread).unwrap();
    let outer_frame = outer.frame().clone();

    drop(outer);
    assert!(outer_frame.is_disposed());
    assert!(outer_frame.value().is_closed());
    assert!(outer_frame.value().is_empty());

    // The closed parent cannot take the child's items, so they come back.
    inner.enlist([2]).unwrap();
    assert_eq!(inner.dispose().unwrap(), vec![2]);
}

#[test]
fn test_child_open_when_parent_completes_gets_items_back() {
    let (outer_processor, batches) = recorder();
    let (inner_processor, inner_batches) = recorder();

    let mut outer = UnitOfWork::open(ScopeBounds::Thread, outer_processor).unwrap();
    outer.enlist(["a".to_string()]).unwrap();
    let mut inner = UnitOfWork::open(ScopeBounds::Thread, inner_processor).unwrap();
    inner.enlist(["late".to_string()]).unwrap();

    outer.complete().unwrap();
    assert!(matches!(
        outer.enlist(["b".to_string()]),
        Err(EnlistmentError::AlreadyCompleted { .. })
    ));

    match inner.dispose() {
        Err(EnlistmentError::ParentClosed { discarded, .. }) => assert_eq!(discarded, 1),
        other => panic!("Expected ParentClosed error, got {other:?}"),
    }
    outer.dispose().unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![vec!["a".to_string()]]);
    assert!(inner_batches.lock().unwrap().is_empty());
}
