//! Commands shared by the command line and the repl.

use std::io::Write;
use std::path::Path;

use rvm_runtime::{evaluate, read, Heap, Result};

use crate::cli::Command;

/// Runs a command that works on its own, writing what it prints to `out`. [Command::Repl] is
/// handled by the caller.
pub fn execute(
    heap: &mut Heap<'_>,
    path: Option<&Path>,
    command: &Command,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Info => {
            match path {
                Some(path) => writeln!(out, "path:     {}", path.display())?,
                None => writeln!(out, "path:     (temporary)")?,
            }
            match heap.capacity() {
                Some(capacity) => writeln!(out, "capacity: {capacity}")?,
                None => writeln!(out, "capacity: unbounded")?,
            }
            writeln!(out, "length:   {}", heap.length())?;
            writeln!(out, "revision: {}", heap.revision())?;
        }
        Command::Get { revision, deep } => {
            let value = heap.get(*revision)?;
            if *deep {
                writeln!(out, "{}", value.materialize()?)?;
            } else {
                writeln!(out, "{value}")?;
            }
        }
        Command::Set { literal } => {
            let value = read(literal)?;
            let revision = heap.set(&value)?;
            writeln!(out, "revision {revision}")?;
        }
        Command::Eval { revision } => {
            let value = evaluate(&heap.lazy(*revision)?)?;
            writeln!(out, "{}", value.materialize()?)?;
        }
        Command::Repl => {}
    }
    Ok(())
}
