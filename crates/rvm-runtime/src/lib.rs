//! Persistent, revisioned heap of immutable values.
//!
//! Values are built in memory, committed to a [Heap] with [Heap::set], which yields a new
//! revision, and fetched back with [Heap::get]. Heaps live in caller-owned buffers and files, in
//! memory mapped files whose capacity may exceed physical memory, or in anonymous memory.

pub mod error;
pub mod evaluate;
pub mod function;
pub mod heap;
pub mod reader;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use evaluate::evaluate;
pub use function::{Arity, Function, Functions};
pub use heap::{Heap, Lazy, Revision, LATEST};
pub use reader::read;
pub use value::{Body, Closure, Value, ValueKind};
