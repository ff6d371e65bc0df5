//! Crosstacks: stacks of stacks, read across
//!
//! A crosstack is an ordinary stack with element type `Stack`. Reading it
//! "across" at level `i` takes the element at offset `i` of every member,
//! which turns a set of parallel stacks into rows:
//!
//! ```text
//!   member 0:  [ 1 | 2 | 3 ]
//!   member 1:  [ 4 | 5 ]
//!   member 2:  [ 7 | 8 | 9 ]
//!
//!   level(outer, 2) over FIFO  ->  3, 9        (member 1 has no level 2)
//! ```
//!
//! A level is a set of views, one per member that has an element at that
//! offset, each in the member's own default perspective unless one is
//! given. Members are visited in the outer stack's insertion order. The
//! level holds its members alive for as long as it exists.

use crate::error::{Result, StackError};
use crate::perspective::Perspective;
use crate::stack::{Access, Stack};
use crate::value::{ElementType, Value};
use crate::view::View;
use std::sync::Arc;

/// Cross-section of a crosstack at one offset
#[derive(Debug)]
pub struct Level {
    index: usize,
    members: Vec<Arc<Stack>>,
    views: Vec<View>,
}

impl Level {
    /// The offset this level reads in every member
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of members that have this level
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn members(&self) -> &[Arc<Stack>] {
        &self.members
    }

    /// The element at this level of every member
    pub fn values(&self) -> Result<Vec<Value>> {
        self.views.iter().map(read_level).collect()
    }

    /// Fold the level's elements in member order
    pub fn reduce<T, F>(&self, init: T, mut f: F) -> Result<T>
    where
        F: FnMut(T, &Value) -> T,
    {
        let mut acc = init;
        for view in &self.views {
            acc = f(acc, &read_level(view)?);
        }
        Ok(acc)
    }
}

// A traversal step reads Keyed members in insertion order
fn read_level(view: &View) -> Result<Value> {
    view.clone().iter().next().unwrap_or(Err(StackError::Empty))
}

/// Level `index` of `outer`, each member read in its default perspective
pub fn level(outer: &Stack, index: usize) -> Result<Level> {
    level_with(outer, index, None)
}

/// Level `index` of `outer`, every member read in `perspective` if given
pub fn level_with(outer: &Stack, index: usize, perspective: Option<Perspective>) -> Result<Level> {
    if outer.element_type() != ElementType::Stack {
        return Err(StackError::TypeMismatch {
            expected: ElementType::Stack,
            found: outer.element_type(),
        });
    }
    let all: Vec<Arc<Stack>> = outer
        .cell()
        .entries(Perspective::Fifo, Access::DIRECT)?
        .into_iter()
        .filter_map(|(value, _)| match value {
            Value::Stack(member) => Some(member),
            _ => None,
        })
        .collect();

    let mut members = Vec::with_capacity(all.len());
    let mut views = Vec::with_capacity(all.len());
    for member in all {
        let view = View::on(&member, perspective.unwrap_or_else(|| member.perspective()));
        if view.remaining()? > index {
            views.push(view.with_cursor(index));
            members.push(member);
        }
    }
    Ok(Level {
        index,
        members,
        views,
    })
}

/// Build a crosstack from member stacks
pub fn from_members<I>(members: I, perspective: Perspective) -> Result<Stack>
where
    I: IntoIterator<Item = Stack>,
{
    let outer = Stack::new(ElementType::Stack, perspective);
    for member in members {
        outer.push(Value::Stack(Arc::new(member)))?;
    }
    Ok(outer)
}

/// Number of levels: the length of the longest member
pub fn depth(outer: &Stack) -> Result<usize> {
    if outer.element_type() != ElementType::Stack {
        return Err(StackError::TypeMismatch {
            expected: ElementType::Stack,
            found: outer.element_type(),
        });
    }
    Ok(outer
        .snapshot()
        .iter()
        .filter_map(Value::as_stack)
        .map(|member| member.len())
        .max()
        .unwrap_or(0))
}
