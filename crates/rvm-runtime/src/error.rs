//! Errors reported by every fallible rvm operation. An [Error] pairs an [ErrorKind] with an
//! optional message, which is either borrowed for the whole program lifetime or owned by the
//! error itself.

use std::borrow::Cow;
use std::fmt::Display;

/// Bit set in packed error flags when the message is owned by the error.
pub const FLAGS_OWNED: u16 = 0x8000;

/// Bit mask for extracting an [ErrorKind] from packed error flags.
pub const FLAGS_KIND: u16 = 0x7fff;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Identifies the kind of some [Error]. Ordinals fit inside [FLAGS_KIND].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    None = 0x0000,
    NoMemory = 0x0001,
    User = 0x7fff,
}

impl ErrorKind {
    /// Extracts the kind from packed error flags, if it names a known kind.
    pub fn from_flags(flags: u16) -> Option<ErrorKind> {
        match flags & FLAGS_KIND {
            0x0000 => Some(ErrorKind::None),
            0x0001 => Some(ErrorKind::NoMemory),
            0x7fff => Some(ErrorKind::User),
            _ => None,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::None => write!(f, "no error"),
            ErrorKind::NoMemory => write!(f, "out of memory"),
            ErrorKind::User => write!(f, "user error"),
        }
    }
}

/// An rvm error.
///
/// The message complements the kind and should be obvious from it. It may carry a file name, an
/// offset, a revision number and so on. Messages passed to [Error::borrowed] are never released by
/// the error, while messages given to [Error::owned] or [Error::copy] are released exactly once,
/// when the error is released or dropped.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.kind, .message))]
pub struct Error {
    kind: ErrorKind,
    message: Option<Cow<'static, str>>,
}

impl Error {
    /// The absence of an error. Carries no message.
    pub const fn none() -> Self {
        Self {
            kind: ErrorKind::None,
            message: None,
        }
    }

    /// Uses `message` as error message without taking ownership of it.
    pub const fn borrowed(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message: Some(Cow::Borrowed(message)),
        }
    }

    /// Takes ownership of `message`, releasing it together with the error.
    pub fn owned(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message: Some(Cow::Owned(message)),
        }
    }

    /// Copies `message` into storage owned by the error.
    pub fn copy(kind: ErrorKind, message: &str) -> Self {
        Self::owned(kind, message.to_owned())
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.message, Some(Cow::Owned(_)))
    }

    /// Packs kind and ownership into a single flags word.
    pub fn flags(&self) -> u16 {
        let owned = if self.is_owned() { FLAGS_OWNED } else { 0 };
        self.kind as u16 | owned
    }

    /// Releases the message if, and only if, it is owned by this error.
    pub fn release(self) {
        if let Some(Cow::Owned(message)) = self.message {
            drop(message);
        }
    }
}

fn describe(kind: &ErrorKind, message: &Option<Cow<'static, str>>) -> String {
    match message {
        Some(message) => message.to_string(),
        None => kind.to_string(),
    }
}

impl Default for Error {
    fn default() -> Self {
        Self::none()
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        if error.raw_os_error() == Some(libc::ENOMEM) {
            Error::owned(ErrorKind::NoMemory, error.to_string())
        } else {
            Error::owned(ErrorKind::User, error.to_string())
        }
    }
}
