use clap::Parser;
use miette::IntoDiagnostic;
use rvm_runtime::Heap;

use crate::cli::{Command, Options};

pub mod cli;
pub mod command;
pub mod repl;

fn main() -> miette::Result<()> {
    // Install the panic handler.
    bupropion::install(bupropion::BupropionHandlerOpts::new).into_diagnostic()?;

    // Parse the command line arguments.
    let options = Options::parse();

    env_logger::Builder::new()
        .filter_level(options.log_level())
        .parse_default_env()
        .init();

    let path = options.heap.as_deref();
    let mut heap = match path {
        Some(path) => Heap::open(path, options.capacity),
        None => Heap::temporary(options.capacity),
    }
    .into_diagnostic()?;

    let result = match &options.command {
        Command::Repl => repl::run(&mut heap, path),
        command => {
            let mut stdout = std::io::stdout().lock();
            command::execute(&mut heap, path, command, &mut stdout).into_diagnostic()
        }
    };

    // The heap is freed even if the command failed, and the command error wins.
    let freed = heap.free().into_diagnostic();
    result.and(freed)
}
