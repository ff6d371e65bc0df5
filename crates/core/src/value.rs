//! Values, element types and keys
//!
//! A `Value` is what a ual program puts on a stack. Each stack is typed: it
//! carries one `ElementType` tag fixed at construction, and every push is
//! checked against it. A stack of stacks (`ElementType::Stack`) is how
//! crosstacks are built.

use crate::error::{Result, StackError};
use crate::stack::Stack;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Element type tag of a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementType {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    Stack,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ElementType {
    // Rank used to order values of different types in `Value::compare`
    fn rank(self) -> u8 {
        match self {
            ElementType::Bool => 0,
            ElementType::Int | ElementType::Float => 1,
            ElementType::Str => 2,
            ElementType::Bytes => 3,
            ElementType::Stack => 4,
        }
    }
}

/// Value: an element stored in a stack
///
/// `Stack` values are shared handles so that a crosstack can hand out
/// member stacks while still owning them; equality on them is identity.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Stack(Arc<Stack>),
}

impl Value {
    /// The element type this value satisfies
    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Int(_) => ElementType::Int,
            Value::Float(_) => ElementType::Float,
            Value::Bool(_) => ElementType::Bool,
            Value::Str(_) => ElementType::Str,
            Value::Bytes(_) => ElementType::Bytes,
            Value::Stack(_) => ElementType::Stack,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&Arc<Stack>> {
        match self {
            Value::Stack(s) => Some(s),
            _ => None,
        }
    }

    /// Natural ordering, used as the default priority comparator.
    ///
    /// Ints and floats compare numerically with each other (floats by
    /// `total_cmp`), strings and bytes lexicographically, `false < true`.
    /// Values of unrelated types order by type; stacks by address.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Stack(a), Value::Stack(b)) => Arc::as_ptr(a).cmp(&Arc::as_ptr(b)),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.element_type().rank().cmp(&b.element_type().rank()),
            },
        }
    }
}

impl Value {
    /// Convert to another element type, as a cross-stack transfer does.
    ///
    /// | from \ to | Int | Float | Str | Bytes | Bool |
    /// |-----------|-----|-------|-----|-------|------|
    /// | Int   | = | exact-ish | decimal | 8 bytes BE | `!= 0` |
    /// | Float | truncated (finite only) | = | shortest decimal | 8 bytes BE | `!= 0.0` |
    /// | Str   | parsed | parsed | = | UTF-8 | `true`/`1`, `false`/`0`/empty |
    /// | Bytes | up to 8 bytes BE | up to 8 bytes BE | UTF-8 only | = | not empty and not `[0]` |
    /// | Bool  | 1 / 0 | 1.0 / 0.0 | `true` / `false` | `[1]` / `[0]` | = |
    ///
    /// Stacks convert only to stacks. Anything that does not convert is a
    /// `TypeMismatch`.
    pub fn convert_to(self, to: ElementType) -> Result<Value> {
        let from = self.element_type();
        if from == to {
            return Ok(self);
        }
        let mismatch = || StackError::TypeMismatch { expected: to, found: from };
        let converted = match (self, to) {
            (Value::Int(n), ElementType::Float) => Some(Value::Float(n as f64)),
            (Value::Int(n), ElementType::Str) => Some(Value::Str(n.to_string())),
            (Value::Int(n), ElementType::Bytes) => Some(Value::Bytes(n.to_be_bytes().to_vec())),
            (Value::Int(n), ElementType::Bool) => Some(Value::Bool(n != 0)),

            (Value::Float(x), ElementType::Int) => x.is_finite().then(|| Value::Int(x.trunc() as i64)),
            (Value::Float(x), ElementType::Str) => Some(Value::Str(x.to_string())),
            (Value::Float(x), ElementType::Bytes) => Some(Value::Bytes(x.to_be_bytes().to_vec())),
            (Value::Float(x), ElementType::Bool) => Some(Value::Bool(x != 0.0)),

            (Value::Str(s), ElementType::Int) => s.parse().ok().map(Value::Int),
            (Value::Str(s), ElementType::Float) => s.parse().ok().map(Value::Float),
            (Value::Str(s), ElementType::Bytes) => Some(Value::Bytes(s.into_bytes())),
            (Value::Str(s), ElementType::Bool) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" | "" => Some(Value::Bool(false)),
                _ => None,
            },

            (Value::Bytes(b), ElementType::Int) => be_word(&b).map(|w| Value::Int(i64::from_be_bytes(w))),
            (Value::Bytes(b), ElementType::Float) => be_word(&b).map(|w| Value::Float(f64::from_be_bytes(w))),
            (Value::Bytes(b), ElementType::Str) => String::from_utf8(b).ok().map(Value::Str),
            (Value::Bytes(b), ElementType::Bool) => Some(Value::Bool(!(b.is_empty() || b == [0]))),

            (Value::Bool(v), ElementType::Int) => Some(Value::Int(i64::from(v))),
            (Value::Bool(v), ElementType::Float) => Some(Value::Float(if v { 1.0 } else { 0.0 })),
            (Value::Bool(v), ElementType::Str) => Some(Value::Str(v.to_string())),
            (Value::Bool(v), ElementType::Bytes) => Some(Value::Bytes(vec![u8::from(v)])),

            _ => None,
        };
        converted.ok_or_else(mismatch)
    }
}

// Left-pad up to 8 big-endian bytes to a full word
fn be_word(bytes: &[u8]) -> Option<[u8; 8]> {
    if bytes.len() > 8 {
        return None;
    }
    let mut word = [0u8; 8];
    word[8 - bytes.len()..].copy_from_slice(bytes);
    Some(word)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            // Identity, not contents
            (Value::Stack(a), Value::Stack(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Stack(s) => write!(f, "<stack of {} {}>", s.len(), s.element_type()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Stack> for Value {
    fn from(s: Stack) -> Self {
        Value::Stack(Arc::new(s))
    }
}

impl From<Arc<Stack>> for Value {
    fn from(s: Arc<Stack>) -> Self {
        Value::Stack(s)
    }
}

/// Key: hashable subset of Value used by the Keyed perspective
///
/// Floats are excluded because NaN breaks equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::Int(n) => n.hash(state),
            Key::Str(s) => s.hash(state),
            Key::Bool(b) => b.hash(state),
        }
    }
}

impl Key {
    /// Try to use a Value as a key; None for floats, bytes and stacks
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Int(n) => Some(Key::Int(*n)),
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Bool(b) => Some(Key::Bool(*b)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::Int(*n),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Bool(b) => Value::Bool(*b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{}", n),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}
