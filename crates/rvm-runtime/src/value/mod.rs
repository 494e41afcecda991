//! This module describes the values stored in rvm heaps. A [Value] is an immutable node of a
//! state tree: a [Body] tagged by its [ValueKind], plus the index the value has inside the heap it
//! was loaded from. Kind and index are packed into a single [Flags] word only when the value is
//! written to a heap.

use std::rc::Rc;

use crate::error::{Error, ErrorKind, Result};
use crate::function::Function;

pub use crate::heap::Lazy;
pub use flags::*;

pub mod display;
pub mod flags;

/// Identifies the kind of some [Value]. Ordinals fit inside [KIND_MASK].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Undefined = 0,
    Bytes = 1,
    Number = 2,
    Symbol = 3,
    Closure = 4,
    Array = 5,
    Link = 6,
    Lazy = 7,
}

impl ValueKind {
    pub fn from_bits(bits: u64) -> ValueKind {
        match bits & KIND_MASK {
            1 => ValueKind::Bytes,
            2 => ValueKind::Number,
            3 => ValueKind::Symbol,
            4 => ValueKind::Closure,
            5 => ValueKind::Array,
            6 => ValueKind::Link,
            7 => ValueKind::Lazy,
            _ => ValueKind::Undefined,
        }
    }
}

/// A function closure.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure<'a> {
    pub function: &'static Function,

    /// Enclosed value, if any.
    pub value: Option<Rc<Value<'a>>>,
}

/// Value body. Only the variant named by the value kind exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Body<'a> {
    Bytes(Rc<[u8]>),
    Number(i64),

    /// Name of a slot in some symbol table.
    Symbol(Rc<[u8]>),

    Closure(Closure<'a>),
    Array(Rc<[Value<'a>]>),
    Link(Rc<Value<'a>>, Rc<Value<'a>>),

    /// A value yet to be loaded from its heap.
    Lazy(Lazy<'a>),
}

/// An rvm value.
///
/// ## Indexed Values
///
/// Values that originate from a heap have an index, which identifies their position within that
/// heap. Such values are referred to as being indexed. Freshly built values have index zero.
///
/// Equality is structural and ignores the index.
#[derive(Debug, Clone)]
pub struct Value<'a> {
    index: u64,
    body: Body<'a>,
}

impl<'a> Value<'a> {
    pub(crate) fn indexed(index: u64, body: Body<'a>) -> Self {
        debug_assert_eq!(index & !INDEX_MASK, 0, "misaligned index {index:#x}");
        Self { index, body }
    }

    pub fn new(body: Body<'a>) -> Self {
        Self { index: 0, body }
    }

    pub fn bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self::new(Body::Bytes(Rc::from(bytes.as_ref())))
    }

    pub fn number(integer: i64) -> Self {
        Self::new(Body::Number(integer))
    }

    pub fn symbol(name: impl AsRef<[u8]>) -> Self {
        Self::new(Body::Symbol(Rc::from(name.as_ref())))
    }

    pub fn closure(function: &'static Function, value: Option<Value<'a>>) -> Self {
        Self::new(Body::Closure(Closure {
            function,
            value: value.map(Rc::new),
        }))
    }

    pub fn array(values: impl IntoIterator<Item = Value<'a>>) -> Self {
        Self::new(Body::Array(values.into_iter().collect()))
    }

    pub fn link(head: Value<'a>, tail: Value<'a>) -> Self {
        Self::new(Body::Link(Rc::new(head), Rc::new(tail)))
    }

    pub fn body(&self) -> &Body<'a> {
        &self.body
    }

    pub fn kind(&self) -> ValueKind {
        match &self.body {
            Body::Bytes(_) => ValueKind::Bytes,
            Body::Number(_) => ValueKind::Number,
            Body::Symbol(_) => ValueKind::Symbol,
            Body::Closure(_) => ValueKind::Closure,
            Body::Array(_) => ValueKind::Array,
            Body::Link(_, _) => ValueKind::Link,
            Body::Lazy(_) => ValueKind::Lazy,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_indexed(&self) -> bool {
        self.index != 0
    }

    /// Kind and index packed the way they are stored in a heap.
    pub fn flags(&self) -> Flags {
        Flags::pack(self.kind(), self.index)
    }

    pub fn as_number(&self) -> Option<i64> {
        match self.body {
            Body::Number(integer) => Some(integer),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(bytes) | Body::Symbol(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value<'a>]> {
        match &self.body {
            Body::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Loads the value if it is lazy, otherwise returns a copy of it. Only the outermost node is
    /// loaded.
    pub fn resolve(&self) -> Result<Value<'a>> {
        match &self.body {
            Body::Lazy(lazy) => lazy.resolve(),
            _ => Ok(self.clone()),
        }
    }

    /// Resolves every lazy node reachable from this value.
    pub fn materialize(&self) -> Result<Value<'a>> {
        enum Step<'v> {
            Visit(Value<'v>),
            Build(Value<'v>, usize),
        }

        let mut pending = vec![Step::Visit(self.clone())];
        let mut done: Vec<Value<'a>> = Vec::new();

        while let Some(step) = pending.pop() {
            match step {
                Step::Visit(value) => {
                    let value = value.resolve()?;
                    let children = value.children().into_iter().cloned().collect::<Vec<_>>();
                    pending.push(Step::Build(value, children.len()));
                    pending.extend(children.into_iter().rev().map(Step::Visit));
                }
                Step::Build(value, count) => {
                    let children = done.split_off(done.len() - count);
                    done.push(value.rebuild(children));
                }
            }
        }

        done.pop()
            .ok_or(Error::borrowed(ErrorKind::User, "nothing to materialize"))
    }

    /// Direct children, in the order they are stored.
    pub(crate) fn children(&self) -> Vec<&Value<'a>> {
        match &self.body {
            Body::Closure(closure) => closure.value.iter().map(|value| &**value).collect(),
            Body::Array(values) => values.iter().collect(),
            Body::Link(head, tail) => vec![&**head, &**tail],
            _ => vec![],
        }
    }

    /// Copies this value with its children replaced, in the order of [Value::children].
    fn rebuild(&self, children: Vec<Value<'a>>) -> Value<'a> {
        let mut children = children.into_iter();
        let body = match &self.body {
            Body::Closure(closure) => Body::Closure(Closure {
                function: closure.function,
                value: children.next().map(Rc::new),
            }),
            Body::Array(_) => Body::Array(children.collect()),
            Body::Link(head, tail) => match (children.next(), children.next()) {
                (Some(head), Some(tail)) => Body::Link(Rc::new(head), Rc::new(tail)),
                _ => Body::Link(head.clone(), tail.clone()),
            },
            body => body.clone(),
        };
        Value {
            index: self.index,
            body,
        }
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (&left.body, &right.body) {
                (Body::Closure(left), Body::Closure(right)) => {
                    if left.function != right.function {
                        return false;
                    }
                    match (&left.value, &right.value) {
                        (Some(left), Some(right)) => pending.push((&**left, &**right)),
                        (None, None) => {}
                        _ => return false,
                    }
                }
                (Body::Array(left), Body::Array(right)) => {
                    if left.len() != right.len() {
                        return false;
                    }
                    pending.extend(left.iter().zip(right.iter()));
                }
                (Body::Link(left_head, left_tail), Body::Link(right_head, right_tail)) => {
                    pending.push((&**left_tail, &**right_tail));
                    pending.push((&**left_head, &**right_head));
                }
                (left, right) => {
                    if left != right {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Children are detached onto a work list before being dropped, so long chains do not exhaust the
/// stack.
impl Drop for Value<'_> {
    fn drop(&mut self) {
        if !matches!(
            self.body,
            Body::Closure(Closure { value: Some(_), .. }) | Body::Array(_) | Body::Link(_, _)
        ) {
            return;
        }

        let mut pending = vec![std::mem::replace(&mut self.body, Body::Number(0))];
        while let Some(body) = pending.pop() {
            match body {
                Body::Closure(Closure {
                    value: Some(value), ..
                }) => detach(value, &mut pending),
                Body::Link(head, tail) => {
                    detach(head, &mut pending);
                    detach(tail, &mut pending);
                }
                Body::Array(mut values) => {
                    if let Some(values) = Rc::get_mut(&mut values) {
                        for value in values {
                            pending.push(std::mem::replace(&mut value.body, Body::Number(0)));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Moves the body of `child` onto `pending` if nothing else shares it.
fn detach<'a>(child: Rc<Value<'a>>, pending: &mut Vec<Body<'a>>) {
    if let Ok(mut value) = Rc::try_unwrap(child) {
        pending.push(std::mem::replace(&mut value.body, Body::Number(0)));
    }
}

impl From<i64> for Value<'_> {
    fn from(integer: i64) -> Self {
        Value::number(integer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_values_are_unindexed() {
        let value = Value::link(Value::number(1), Value::bytes("two"));
        assert_eq!(value.kind(), ValueKind::Link);
        assert_eq!(value.index(), 0);
        assert!(!value.is_indexed());
        assert_eq!(value.flags().kind(), ValueKind::Link);
    }

    #[test]
    fn indexed_values_report_index() {
        let value = Value::indexed(0x40, Body::Number(3));
        assert!(value.is_indexed());
        assert_eq!(value.flags(), Flags::pack(ValueKind::Number, 0x40));
    }

    #[test]
    fn equality_ignores_index() {
        let stored = Value::indexed(0x48, Body::Number(42));
        assert_eq!(stored, Value::number(42));
        assert_ne!(stored, Value::number(43));
        assert_ne!(Value::bytes("a"), Value::symbol("a"));
    }

    #[test]
    fn materialize_keeps_resident_values() {
        let value = Value::array([Value::number(1), Value::symbol("x")]);
        assert_eq!(value.materialize().unwrap(), value);
        assert_eq!(value.resolve().unwrap(), value);
    }

    #[test]
    fn kind_from_bits_masks_index() {
        assert_eq!(ValueKind::from_bits(0x40 | 5), ValueKind::Array);
        assert_eq!(ValueKind::from_bits(0x40), ValueKind::Undefined);
    }

    #[test]
    fn accessors_match_kinds() {
        let value = Value::array([Value::from(7), Value::bytes("b")]);
        let values = value.as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].as_number(), Some(7));
        assert_eq!(values[1].as_bytes(), Some(&b"b"[..]));
        assert_eq!(Value::number(1).as_array(), None);
    }

    #[test]
    fn deep_chains_compare_and_drop() {
        let chain = |length: i64| {
            let mut chain = Value::array([]);
            for integer in 0..length {
                chain = Value::link(Value::from(integer), chain);
            }
            chain
        };
        let first = chain(100_000);
        let second = chain(100_000);
        assert!(first == second);
        assert!(first != chain(99_999));
        assert!(first.materialize().unwrap() == second);
    }
}
