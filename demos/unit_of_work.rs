use ambient_core::error::BoxError;
use ambient_core::{DisposableContext, NestedScope, ScopeBounds, UnitOfWork, WorkProcessor};
use std::sync::Arc;

#[derive(Debug)]
struct RequestContext {
    user: &'static str,
}

struct PrintBatch;

impl WorkProcessor for PrintBatch {
    type Item = String;
    type Error = std::io::Error;

    fn process(&mut self, items: Vec<String>) -> Result<(), std::io::Error> {
        println!("Saving {} change(s): {items:?}", items.len());
        Ok(())
    }
}

fn rename_user(name: &str) -> Result<(), BoxError> {
    let user = NestedScope::<RequestContext>::current()
        .map(|context| context.user)
        .unwrap_or("anonymous");

    let mut work = UnitOfWork::open(ScopeBounds::Thread, PrintBatch)?;
    work.enlist([format!("{user} renamed to {name}")])?;
    work.complete()?;
    work.dispose()?;
    Ok(())
}

fn main() -> Result<(), BoxError> {
    let _request = NestedScope::open(ScopeBounds::Thread, RequestContext { user: "alice" })?;

    let mut contexts = DisposableContext::open(ScopeBounds::Thread)?;
    contexts.enlist(Arc::new(|| -> Result<(), BoxError> {
        println!("Closing connection");
        Ok(())
    }))?;

    // The inner units of work join the outer one; nothing is saved until it completes.
    let mut outer = UnitOfWork::open(ScopeBounds::Thread, PrintBatch)?;
    rename_user("Alicia")?;
    rename_user("Ali")?;
    outer.complete()?;
    outer.dispose()?;

    contexts.dispose()?;
    Ok(())
}
