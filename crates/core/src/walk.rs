//! Whole-stack traversals
//!
//! Convenience forms of [`View::walk`] over a whole stack. `map` and
//! `filter` copy in insertion order so the result has the source's layout;
//! `reduce` folds in the source's default perspective order. The source is
//! never modified.

use crate::error::Result;
use crate::perspective::Perspective;
use crate::stack::Stack;
use crate::value::{ElementType, Value};
use crate::view::View;

/// New stack of `dest_type` holding `transform(v)` for every element.
///
/// The result has the source's layout, keys and default perspective.
pub fn map<F>(source: &Stack, transform: F, dest_type: ElementType) -> Result<Stack>
where
    F: FnMut(Value) -> Value,
{
    let dest = Stack::new(dest_type, Perspective::Fifo);
    View::on(source, Perspective::Fifo).walk(transform, &dest)?;
    dest.set_perspective(source.perspective());
    Ok(dest)
}

/// Push every element `keep` accepts into `dest`; returns how many
pub fn filter<P>(source: &Stack, keep: P, dest: &Stack) -> Result<usize>
where
    P: FnMut(&Value) -> bool,
{
    View::on(source, Perspective::Fifo).walk_where(|v| v, dest, keep)
}

/// Fold every element in the source's default perspective order
pub fn reduce<T, F>(source: &Stack, init: T, mut f: F) -> Result<T>
where
    F: FnMut(T, &Value) -> T,
{
    let mut view = View::on(source, source.perspective());
    view.iter().try_fold(init, |acc, item| item.map(|v| f(acc, &v)))
}
