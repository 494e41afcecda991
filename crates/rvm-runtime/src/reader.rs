//! The reader parses value literals, written the way [Value] displays them. The main function is
//! [read].
//!
//! ```text
//! 42 -7            numbers
//! "text\n\xff"     bytes, with \" \\ \n \t \r and \xNN escapes
//! :name            symbols
//! [1 2 3]          arrays
//! (head . tail)    links
//! ; comment        until the end of the line
//! ```

use std::{iter::Peekable, str::Chars};

use crate::error::{Error, ErrorKind, Result};
use crate::value::Value;

/// Position of the reader in its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A state is a mutable object that is used to keep track of the current state of the reader.
struct State<'s> {
    peekable: Peekable<Chars<'s>>,
    position: Location,
}

impl<'s> State<'s> {
    fn new(input: &'s str) -> Self {
        Self {
            peekable: input.chars().peekable(),
            position: Location { line: 1, column: 0 },
        }
    }

    fn error(&self, what: &str) -> Error {
        Error::owned(ErrorKind::User, format!("{what} at {}", self.position))
    }

    fn advance(&mut self) -> Option<char> {
        let char = self.peekable.next()?;

        match char {
            '\n' => {
                self.position.line += 1;
                self.position.column = 0;
            }
            _ => self.position.column += 1,
        }

        Some(char)
    }

    fn accumulate_while<F>(&mut self, mut string: String, mut f: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        while let Some(&char) = self.peekable.peek() {
            if !f(char) {
                break;
            }
            string.push(char);
            self.advance();
        }
        string
    }

    /// Skips whitespace and comments, returning the next significant character without
    /// consuming it.
    fn skip(&mut self) -> Option<char> {
        loop {
            match *self.peekable.peek()? {
                ' ' | '\n' | '\r' | '\t' => {
                    self.advance();
                }
                ';' => {
                    self.accumulate_while(String::new(), |c| c != '\n');
                }
                char => return Some(char),
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.skip() {
            Some(char) if char == expected => {
                self.advance();
                Ok(())
            }
            Some(char) => Err(self.error(&format!("expected '{expected}' but got '{char}'"))),
            None => Err(self.error(&format!("expected '{expected}' but got end of input"))),
        }
    }

    fn read<'a>(&mut self) -> Result<Value<'a>> {
        let Some(char) = self.skip() else {
            return Err(self.error("unexpected end of input"));
        };

        match char {
            '"' => self.parse_bytes(),
            ':' => self.parse_symbol(),
            '[' => self.parse_array(),
            '(' => self.parse_link(),
            '-' | '0'..='9' => self.parse_number(),
            char => Err(self.error(&format!("unexpected '{char}'"))),
        }
    }

    fn parse_bytes<'a>(&mut self) -> Result<Value<'a>> {
        self.advance();
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some('"') => return Ok(Value::bytes(bytes)),
                Some('\\') => bytes.push(self.parse_escape()?),
                Some(char) => {
                    let mut buffer = [0; 4];
                    bytes.extend_from_slice(char.encode_utf8(&mut buffer).as_bytes());
                }
                None => return Err(self.error("unclosed string")),
            }
        }
    }

    fn parse_escape(&mut self) -> Result<u8> {
        match self.advance() {
            Some('"') => Ok(b'"'),
            Some('\\') => Ok(b'\\'),
            Some('n') => Ok(b'\n'),
            Some('t') => Ok(b'\t'),
            Some('r') => Ok(b'\r'),
            Some('x') => {
                let digits = (0..2).filter_map(|_| self.advance()).collect::<String>();
                match u8::from_str_radix(&digits, 16) {
                    Ok(byte) if digits.chars().all(|c| c.is_ascii_hexdigit()) => Ok(byte),
                    _ => Err(self.error(&format!("invalid escape '\\x{digits}'"))),
                }
            }
            Some(char) => Err(self.error(&format!("invalid escape '\\{char}'"))),
            None => Err(self.error("unclosed string")),
        }
    }

    fn parse_symbol<'a>(&mut self) -> Result<Value<'a>> {
        self.advance();
        let name = self.accumulate_while(String::new(), is_name);
        if name.is_empty() {
            return Err(self.error("empty symbol"));
        }
        Ok(Value::symbol(name))
    }

    fn parse_number<'a>(&mut self) -> Result<Value<'a>> {
        let string = self.accumulate_while(String::new(), is_name);
        string
            .parse::<i64>()
            .map(Value::number)
            .map_err(|_| self.error(&format!("invalid number '{string}'")))
    }

    fn parse_array<'a>(&mut self) -> Result<Value<'a>> {
        self.advance();
        let mut values = vec![];
        loop {
            match self.skip() {
                Some(']') => {
                    self.advance();
                    return Ok(Value::array(values));
                }
                Some(_) => values.push(self.read()?),
                None => return Err(self.error("unclosed array")),
            }
        }
    }

    fn parse_link<'a>(&mut self) -> Result<Value<'a>> {
        self.advance();
        let head = self.read()?;
        self.expect('.')?;
        let tail = self.read()?;
        self.expect(')')?;
        Ok(Value::link(head, tail))
    }
}

fn is_name(char: char) -> bool {
    !matches!(
        char,
        ' ' | '\n' | '\r' | '\t' | '(' | ')' | '[' | ']' | '"' | ';'
    )
}

/// Reads a single value literal. Anything but whitespace and comments after it is an error.
pub fn read<'a>(input: &str) -> Result<Value<'a>> {
    let mut state = State::new(input);
    let value = state.read()?;
    match state.skip() {
        Some(char) => Err(state.error(&format!("unexpected trailing '{char}'"))),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scalars() {
        assert_eq!(read("42").unwrap(), Value::number(42));
        assert_eq!(read("  -7 ").unwrap(), Value::number(-7));
        assert_eq!(read("\"some text\"").unwrap(), Value::bytes("some text"));
        assert_eq!(read(":name").unwrap(), Value::symbol("name"));
    }

    #[test]
    fn reads_nested_values() {
        let value = read("([1 2 \"x\"] . (:a . [])) ; trailing comment").unwrap();
        assert_eq!(
            value,
            Value::link(
                Value::array([Value::number(1), Value::number(2), Value::bytes("x")]),
                Value::link(Value::symbol("a"), Value::array([])),
            )
        );
    }

    #[test]
    fn display_reads_back() {
        let source = "([1 -2] . (:name . \"text\"))";
        assert_eq!(read(source).unwrap().to_string(), source);
    }

    #[test]
    fn reports_positions() {
        let error = read("[1 2").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::User);
        assert_eq!(error.message(), Some("unclosed array at 1:4"));

        let error = read("(1 2)").unwrap_err();
        assert_eq!(error.message(), Some("expected '.' but got '2' at 1:3"));

        let error = read("1\n2").unwrap_err();
        assert_eq!(error.message(), Some("unexpected trailing '2' at 2:0"));
    }

    #[test]
    fn rejects_bad_literals() {
        assert!(read("").is_err());
        assert!(read("\"open").is_err());
        assert!(read("12ab").is_err());
        assert!(read(":").is_err());
        assert!(read("{").is_err());
        assert!(read("\"\\q\"").is_err());
        assert!(read("\"\\x4\"").is_err());
    }

    #[test]
    fn reads_escapes() {
        assert_eq!(
            read(r#""a\"b\\c\n\x00\xff""#).unwrap(),
            Value::bytes([b'a', b'"', b'b', b'\\', b'c', b'\n', 0x00, 0xff])
        );
    }

    #[test]
    fn printed_bytes_read_back() {
        let samples: [&[u8]; 4] = [
            b"plain",
            b"quote \" and \\",
            b"\xff\xfe\x00",
            "ação".as_bytes(),
        ];
        for bytes in samples {
            let value = Value::bytes(bytes);
            assert_eq!(read(&value.to_string()).unwrap(), value);
        }
    }
}
