pub mod bounds;
pub mod enlistment;
pub mod error;
pub mod maybe;
pub mod outcome;
pub mod registry;
pub mod scope;
pub mod sequence;
pub mod settings;
pub mod spin;

pub use bounds::ScopeBounds;
pub use enlistment::{
    dispose_all, Disposable, DisposableContext, DisposableRef, EnlistmentScope, UnitOfWork,
    WorkProcessor,
};
pub use error::AmbientError;
pub use maybe::Maybe;
pub use outcome::Outcome;
pub use scope::{NestableScope, NestedScope, Scope, ScopeId, ScopeRef};
pub use sequence::{MaybeIteratorExt, MaybeSequenceExt};
pub use settings::AmbientSettings;
pub use spin::SpinLock;
