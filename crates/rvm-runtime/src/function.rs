//! Native functions that closures refer to. Heaps persist closures by function name, so every
//! function that may appear in a stored closure has to be registered in the [Functions] table of
//! the heap that loads it.

use std::fmt::Debug;

use fxhash::FxHashMap;

use crate::error::Result;
use crate::value::Value;

/// Packed arity of a variadic function.
pub const ARITY_ANY: isize = -1;

/// Native callable behind a [Function].
pub type Native = for<'a> fn(&[Value<'a>]) -> Result<Value<'a>>;

/// Parameter count of a [Function].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(arity) => arity == count,
            Arity::Any => true,
        }
    }

    pub fn packed(self) -> isize {
        match self {
            Arity::Exactly(arity) => arity as isize,
            Arity::Any => ARITY_ANY,
        }
    }
}

/// A named function of known arity.
pub struct Function {
    pub name: &'static str,
    pub arity: Arity,
    pub pointer: Native,
}

impl Function {
    pub fn call<'a>(&self, args: &[Value<'a>]) -> Result<Value<'a>> {
        (self.pointer)(args)
    }
}

impl Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Function {}

/// Functions known to a heap, by name.
#[derive(Debug, Default, Clone)]
pub struct Functions {
    table: FxHashMap<&'static str, &'static Function>,
}

impl Functions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function`, replacing any function of the same name.
    pub fn register(&mut self, function: &'static Function) {
        self.table.insert(function.name, function);
    }

    pub fn find(&self, name: &str) -> Option<&'static Function> {
        self.table.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first<'a>(args: &[Value<'a>]) -> Result<Value<'a>> {
        Ok(args[0].clone())
    }

    static FIRST: Function = Function {
        name: "first",
        arity: Arity::Exactly(1),
        pointer: first,
    };

    #[test]
    fn arity_accepts_counts() {
        assert!(Arity::Exactly(2).accepts(2));
        assert!(!Arity::Exactly(2).accepts(3));
        assert!(Arity::Any.accepts(0));
        assert_eq!(Arity::Any.packed(), ARITY_ANY);
        assert_eq!(Arity::Exactly(3).packed(), 3);
    }

    #[test]
    fn registered_functions_are_found_by_name() {
        let mut functions = Functions::new();
        assert!(functions.is_empty());

        functions.register(&FIRST);
        assert_eq!(functions.len(), 1);
        assert_eq!(functions.find("first"), Some(&FIRST));
        assert_eq!(functions.find("second"), None);
    }

    #[test]
    fn calls_native_pointer() {
        let result = FIRST.call(&[Value::number(7), Value::number(8)]).unwrap();
        assert_eq!(result, Value::number(7));
    }
}
