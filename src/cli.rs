use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use rvm_runtime::{Revision, LATEST};

/// Inspects and edits persistent rvm heaps.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// Heap file to open, created if absent. A temporary heap is used if omitted.
    #[arg(long, env = "RVM_HEAP", value_name = "PATH")]
    pub heap: Option<PathBuf>,

    /// Address space reserved for the heap, in bytes.
    #[arg(long, default_value_t = 1 << 20, value_name = "BYTES")]
    pub capacity: usize,

    /// Logs more, repeat for even more. `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Prints the path, capacity, length and revision of the heap.
    Info,

    /// Prints a revision, the latest if omitted.
    Get {
        #[arg(default_value_t = LATEST)]
        revision: Revision,

        /// Loads the whole value instead of only its root.
        #[arg(long)]
        deep: bool,
    },

    /// Commits a value literal as a new revision.
    Set {
        /// Value literal, such as `[1 "two" :three]`.
        literal: String,
    },

    /// Evaluates a revision, the latest if omitted.
    Eval {
        #[arg(default_value_t = LATEST)]
        revision: Revision,
    },

    /// Starts an interactive session over the heap.
    Repl,
}
