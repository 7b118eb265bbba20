//! Iterator helpers that answer with a [`Maybe`] instead of panicking or
//! returning `Option`.

use crate::error::{CapturedError, SequenceError};
use crate::maybe::Maybe;

pub trait MaybeIteratorExt: Iterator + Sized {
    fn first_maybe(mut self) -> Maybe<Self::Item> {
        self.next().into()
    }

    fn last_maybe(self) -> Maybe<Self::Item> {
        self.last().into()
    }

    /// The only element, `NoValue` for an empty sequence, or a captured
    /// `SequenceError::MoreThanOneElement`.
    fn single_maybe(mut self) -> Maybe<Self::Item> {
        match (self.next(), self.next()) {
            (None, _) => Maybe::NoValue,
            (Some(item), None) => Maybe::Value(item),
            (Some(_), Some(_)) => {
                Maybe::Exception(CapturedError::new(SequenceError::MoreThanOneElement))
            }
        }
    }

    fn element_at_maybe(mut self, index: usize) -> Maybe<Self::Item> {
        self.nth(index).into()
    }

    fn first_where<F>(mut self, predicate: F) -> Maybe<Self::Item>
    where
        F: FnMut(&Self::Item) -> bool,
    {
        self.find(predicate).into()
    }
}

impl<I: Iterator> MaybeIteratorExt for I {}

/// Iterator over the values of a sequence of `Maybe`s.
pub struct Values<I> {
    inner: I,
}

impl<I, T> Iterator for Values<I>
where
    I: Iterator<Item = Maybe<T>>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.by_ref().find_map(Maybe::into_option)
    }
}

pub trait MaybeSequenceExt<T>: Iterator<Item = Maybe<T>> + Sized {
    /// Skips empty and exception entries.
    fn values(self) -> Values<Self> {
        Values { inner: self }
    }
}

impl<I, T> MaybeSequenceExt<T> for I where I: Iterator<Item = Maybe<T>> {}
