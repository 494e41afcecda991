//! Values print in the syntax of [crate::reader], so printed numbers, bytes, arrays and links read
//! back as equal values. Symbols read back when their names hold no whitespace or delimiters.
//! Closures and lazy values print in a form the reader rejects.

use std::fmt::{Display, Formatter, Write};

use super::*;

enum Pending<'v, 'a> {
    Body(&'v Body<'a>),
    Text(&'static str),
}

/// Prints `body` with an explicit work list, so deep values print in constant stack space.
fn write_body(f: &mut Formatter<'_>, body: &Body<'_>) -> std::fmt::Result {
    let mut pending = vec![Pending::Body(body)];

    while let Some(next) = pending.pop() {
        let body = match next {
            Pending::Text(text) => {
                f.write_str(text)?;
                continue;
            }
            Pending::Body(body) => body,
        };

        match body {
            Body::Bytes(bytes) => write_bytes(f, bytes)?,
            Body::Number(integer) => write!(f, "{integer}")?,
            Body::Symbol(name) => write!(f, ":{}", String::from_utf8_lossy(name))?,
            Body::Closure(closure) => {
                write!(f, "#<closure {}", closure.function.name)?;
                pending.push(Pending::Text(">"));
                if let Some(value) = &closure.value {
                    pending.push(Pending::Body(&value.body));
                    pending.push(Pending::Text(" "));
                }
            }
            Body::Array(values) => {
                f.write_char('[')?;
                pending.push(Pending::Text("]"));
                for (nth, value) in values.iter().enumerate().rev() {
                    pending.push(Pending::Body(&value.body));
                    if nth > 0 {
                        pending.push(Pending::Text(" "));
                    }
                }
            }
            Body::Link(head, tail) => {
                f.write_char('(')?;
                pending.push(Pending::Text(")"));
                pending.push(Pending::Body(&tail.body));
                pending.push(Pending::Text(" . "));
                pending.push(Pending::Body(&head.body));
            }
            Body::Lazy(lazy) => write!(f, "#<lazy {:#x}>", lazy.index())?,
        }
    }
    Ok(())
}

/// Prints bytes as a quoted string. Quotes, backslashes, control characters and invalid UTF-8 are
/// escaped.
fn write_bytes(f: &mut Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    f.write_char('"')?;
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                write_text(f, text)?;
                break;
            }
            Err(error) => {
                let (valid, invalid) = rest.split_at(error.valid_up_to());
                write_text(f, std::str::from_utf8(valid).unwrap_or_default())?;
                let length = error.error_len().unwrap_or(invalid.len());
                for byte in &invalid[..length] {
                    write!(f, "\\x{byte:02x}")?;
                }
                rest = &invalid[length..];
            }
        }
    }
    f.write_char('"')
}

fn write_text(f: &mut Formatter<'_>, text: &str) -> std::fmt::Result {
    for char in text.chars() {
        match char {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            char if char.is_ascii_control() => write!(f, "\\x{:02x}", char as u8)?,
            char => f.write_char(char)?,
        }
    }
    Ok(())
}

impl Display for Closure<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<closure {}", self.function.name)?;
        if let Some(value) = &self.value {
            write!(f, " {}", value)?;
        }
        write!(f, ">")
    }
}

impl Display for Body<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_body(f, self)
    }
}

impl Display for Value<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_body(f, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_literal_syntax() {
        let value = Value::link(
            Value::array([Value::number(1), Value::number(-2)]),
            Value::link(Value::symbol("name"), Value::bytes("text")),
        );
        assert_eq!(value.to_string(), "([1 -2] . (:name . \"text\"))");
    }

    #[test]
    fn prints_empty_array() {
        assert_eq!(Value::array([]).to_string(), "[]");
    }

    #[test]
    fn escapes_bytes() {
        assert_eq!(
            Value::bytes("say \"hi\"\\\n").to_string(),
            r#""say \"hi\"\\\n""#
        );
        assert_eq!(Value::bytes([b'a', 0xff, 0x01, b'b']).to_string(), r#""a\xff\x01b""#);
        assert_eq!(Value::bytes("ação").to_string(), "\"ação\"");
    }

    #[test]
    fn prints_deep_chains() {
        let mut chain = Value::array([]);
        for integer in 0..10_000 {
            chain = Value::link(Value::number(integer), chain);
        }
        let printed = chain.to_string();
        assert!(printed.starts_with("(9999 . (9998 . "));
        assert!(printed.ends_with("(0 . [])))"));
    }
}
