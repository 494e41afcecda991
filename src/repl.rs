use std::io::Write;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;
use rustyline::{
    error::ReadlineError, history::DefaultHistory, validate::MatchingBracketValidator, Completer,
    Editor, Helper, Highlighter, Hinter, Validator,
};
use rvm_runtime::{Error, ErrorKind, Heap, Result, Revision, LATEST};

use crate::cli::Command;
use crate::command::execute;

const HELP: &str = "\
info                     prints the path, capacity, length and revision of the heap
get [REVISION] [--deep]  prints a revision, the latest if omitted
set LITERAL              commits a value literal as a new revision
eval [REVISION]          evaluates a revision, the latest if omitted
help                     prints this message
quit                     leaves the repl";

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputValidator {
    #[rustyline(Validator)]
    brackets: MatchingBracketValidator,
}

/// A line typed into the repl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    Help,
    Quit,
    Run(Command),
}

fn revision(word: Option<&str>) -> Result<Revision> {
    match word {
        Some(word) => word
            .parse()
            .map_err(|_| Error::owned(ErrorKind::User, format!("invalid revision: {word}"))),
        None => Ok(LATEST),
    }
}

fn no_more(mut words: std::str::SplitWhitespace<'_>) -> Result<()> {
    match words.next() {
        Some(word) => Err(Error::owned(
            ErrorKind::User,
            format!("unexpected argument: {word}"),
        )),
        None => Ok(()),
    }
}

pub fn parse_line(line: &str) -> Result<Line> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let mut words = rest.split_whitespace();

    let command = match word {
        "" => return Ok(Line::Empty),
        "help" => return Ok(Line::Help),
        "quit" | "exit" => return Ok(Line::Quit),
        "info" => Command::Info,
        "get" => {
            let mut deep = false;
            let mut number = None;
            for word in words.by_ref() {
                match word {
                    "--deep" => deep = true,
                    word if number.is_none() => number = Some(word),
                    word => {
                        return Err(Error::owned(
                            ErrorKind::User,
                            format!("unexpected argument: {word}"),
                        ))
                    }
                }
            }
            Command::Get {
                revision: revision(number)?,
                deep,
            }
        }
        "set" => Command::Set {
            literal: rest.trim().to_string(),
        },
        "eval" => {
            let revision = revision(words.next())?;
            no_more(words)?;
            Command::Eval { revision }
        }
        word => {
            return Err(Error::owned(
                ErrorKind::User,
                format!("unknown command: {word}, try help"),
            ))
        }
    };
    Ok(Line::Run(command))
}

fn get_history_path() -> Option<PathBuf> {
    let home_env = std::env::var("HOME").ok()?;
    let path = format!("{home_env}/.rvm.history");
    Some(PathBuf::from(path))
}

/// Reads commands until end of input, running each against `heap`. Failing commands are reported
/// and do not end the session.
pub fn run(heap: &mut Heap<'_>, path: Option<&Path>) -> miette::Result<()> {
    let mut rl: Editor<InputValidator, DefaultHistory> = Editor::new().into_diagnostic()?;
    rl.set_helper(Some(InputValidator {
        brackets: MatchingBracketValidator::new(),
    }));

    let history = get_history_path();
    if let Some(history) = &history {
        if rl.load_history(history).is_err() {
            log::info!("no previous history at {}", history.display());
        }
    }

    let mut stdout = std::io::stdout();
    loop {
        match rl.readline("rvm> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str()).into_diagnostic()?;

                let result = match parse_line(&line) {
                    Ok(Line::Empty) => Ok(()),
                    Ok(Line::Help) => writeln!(stdout, "{HELP}").map_err(Error::from),
                    Ok(Line::Quit) => break,
                    Ok(Line::Run(command)) => execute(heap, path, &command, &mut stdout),
                    Err(error) => Err(error),
                };
                if let Err(error) = result {
                    eprintln!("error: {error}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error).into_diagnostic(),
        }
    }

    stdout.flush().into_diagnostic()?;
    if let Some(history) = history {
        if let Err(error) = rl.append_history(&history) {
            log::warn!("cannot save history to {}: {error}", history.display());
        }
    }
    Ok(())
}
