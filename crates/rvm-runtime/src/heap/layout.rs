//! On-disk layout of a heap region.
//!
//! A region starts with a [Header] of [HEADER_SIZE] bytes, followed by records. Every record
//! starts with the [Flags] word of the value it encodes, is eight byte aligned and is made of
//! little-endian words. Commit records use the otherwise undefined kind and tie a revision number
//! to the index of its root value.
//!
//! | Kind      | Words after flags                              |
//! |-----------|------------------------------------------------|
//! | Undefined | revision, root, previous commit                |
//! | Bytes     | length, bytes padded to eight                  |
//! | Number    | integer                                        |
//! | Symbol    | length, bytes padded to eight                  |
//! | Closure   | enclosed value or zero, name length, name      |
//! | Array     | length, one index per element                  |
//! | Link      | head, tail                                     |

use crate::error::{Error, ErrorKind, Result};
use crate::value::{Flags, ValueKind};

pub const MAGIC: [u8; 8] = *b"RVMHEAP\0";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;
pub const WORD: usize = 8;

pub fn corrupt(what: &str, offset: u64) -> Error {
    Error::owned(ErrorKind::User, format!("corrupt heap: {what} at {offset:#x}"))
}

/// Rounds `length` up to the next multiple of [WORD].
pub fn padded(length: usize) -> usize {
    (length + WORD - 1) & !(WORD - 1)
}

pub fn read_word(bytes: &[u8], offset: u64) -> Result<u64> {
    let start = usize::try_from(offset).map_err(|_| corrupt("word out of range", offset))?;
    let word = start
        .checked_add(WORD)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| corrupt("word out of range", offset))?;
    let mut buffer = [0; WORD];
    buffer.copy_from_slice(word);
    Ok(u64::from_le_bytes(buffer))
}

/// Header at the beginning of every heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Amount of used bytes, header included.
    pub length: u64,

    /// Latest committed revision, or zero if none.
    pub revision: u64,

    /// Index of the commit record of the latest revision, or zero if none.
    pub latest: u64,
}

impl Header {
    pub fn empty() -> Self {
        Self {
            length: HEADER_SIZE as u64,
            revision: 0,
            latest: 0,
        }
    }

    /// Reads the header at the start of `bytes`. Returns `None` if the region has never been
    /// used as a heap, which is the case when it is shorter than a header or starts with zeros.
    pub fn read(bytes: &[u8]) -> Result<Option<Header>> {
        if bytes.len() < HEADER_SIZE {
            return if bytes.iter().all(|byte| *byte == 0) {
                Ok(None)
            } else {
                Err(Error::borrowed(ErrorKind::User, "not a heap"))
            };
        }
        if bytes[..MAGIC.len()].iter().all(|byte| *byte == 0) {
            return Ok(None);
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::borrowed(ErrorKind::User, "not a heap"));
        }

        let version = read_word(bytes, 8)? as u32;
        if version != VERSION {
            return Err(Error::owned(
                ErrorKind::User,
                format!("unsupported heap version {version}"),
            ));
        }

        let header = Header {
            length: read_word(bytes, 16)?,
            revision: read_word(bytes, 24)?,
            latest: read_word(bytes, 32)?,
        };

        if header.length < HEADER_SIZE as u64 || header.length > bytes.len() as u64 {
            return Err(corrupt("length", 16));
        }
        if header.latest >= header.length || (header.revision == 0) != (header.latest == 0) {
            return Err(corrupt("latest commit", 32));
        }
        Ok(Some(header))
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0; HEADER_SIZE];
        bytes[..8].copy_from_slice(&MAGIC);
        bytes[8..12].copy_from_slice(&VERSION.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.length.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.revision.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.latest.to_le_bytes());
        bytes
    }
}

/// A record as found in a region: its kind and the words following its flags.
#[derive(Debug, Clone, Copy)]
pub struct Raw<'b> {
    pub index: u64,
    pub kind: ValueKind,
    pub payload: &'b [u8],
}

impl<'b> Raw<'b> {
    /// Reads the record at `index`. `bytes` must only cover the committed part of the region.
    pub fn read(bytes: &'b [u8], index: u64) -> Result<Raw<'b>> {
        if index < HEADER_SIZE as u64 || index % WORD as u64 != 0 {
            return Err(corrupt("misplaced record", index));
        }

        let flags = Flags(read_word(bytes, index)?);
        if flags.index() != index {
            return Err(corrupt("record index mismatch", index));
        }

        let body = index + WORD as u64;
        let words = match flags.kind() {
            ValueKind::Undefined => 3,
            ValueKind::Number => 1,
            ValueKind::Link => 2,
            ValueKind::Bytes | ValueKind::Symbol => {
                let length = read_word(bytes, body)?;
                1 + padded_words(length, index)?
            }
            ValueKind::Closure => {
                let length = read_word(bytes, body + WORD as u64)?;
                2 + padded_words(length, index)?
            }
            ValueKind::Array => {
                let length = read_word(bytes, body)?;
                length
                    .checked_add(1)
                    .ok_or_else(|| corrupt("array length", index))?
            }
            ValueKind::Lazy => return Err(corrupt("stored lazy value", index)),
        };

        let start = body as usize;
        let payload = words
            .checked_mul(WORD as u64)
            .and_then(|size| usize::try_from(size).ok())
            .and_then(|size| start.checked_add(size))
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| corrupt("truncated record", index))?;

        Ok(Raw {
            index,
            kind: flags.kind(),
            payload,
        })
    }

    /// Total size of the record, flags included.
    pub fn size(&self) -> usize {
        WORD + self.payload.len()
    }

    fn word(&self, nth: usize) -> u64 {
        let mut buffer = [0; WORD];
        buffer.copy_from_slice(&self.payload[nth * WORD..(nth + 1) * WORD]);
        u64::from_le_bytes(buffer)
    }

    fn tail(&self, skip: usize, length: u64) -> &'b [u8] {
        let start = skip * WORD;
        &self.payload[start..start + length as usize]
    }

    pub fn decode(&self) -> Result<Record<'b>> {
        Ok(match self.kind {
            ValueKind::Undefined => Record::Commit {
                revision: self.word(0),
                root: self.word(1),
                previous: self.word(2),
            },
            ValueKind::Bytes => Record::Bytes(self.tail(1, self.word(0))),
            ValueKind::Number => Record::Number(self.word(0) as i64),
            ValueKind::Symbol => Record::Symbol(self.tail(1, self.word(0))),
            ValueKind::Closure => {
                let name = std::str::from_utf8(self.tail(2, self.word(1)))
                    .map_err(|_| corrupt("function name", self.index))?;
                Record::Closure {
                    value: self.word(0),
                    name,
                }
            }
            ValueKind::Array => {
                Record::Array((1..self.payload.len() / WORD).map(|nth| self.word(nth)).collect())
            }
            ValueKind::Link => Record::Link {
                head: self.word(0),
                tail: self.word(1),
            },
            ValueKind::Lazy => return Err(corrupt("stored lazy value", self.index)),
        })
    }
}

fn padded_words(length: u64, index: u64) -> Result<u64> {
    let length = usize::try_from(length).map_err(|_| corrupt("length", index))?;
    if length > usize::MAX - WORD {
        return Err(corrupt("length", index));
    }
    Ok((padded(length) / WORD) as u64)
}

/// A decoded record. Child values are referred to by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'b> {
    Commit { revision: u64, root: u64, previous: u64 },
    Bytes(&'b [u8]),
    Number(i64),
    Symbol(&'b [u8]),
    Closure { value: u64, name: &'b str },
    Array(Vec<u64>),
    Link { head: u64, tail: u64 },
}

impl Record<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            Record::Commit { .. } => ValueKind::Undefined,
            Record::Bytes(_) => ValueKind::Bytes,
            Record::Number(_) => ValueKind::Number,
            Record::Symbol(_) => ValueKind::Symbol,
            Record::Closure { .. } => ValueKind::Closure,
            Record::Array(_) => ValueKind::Array,
            Record::Link { .. } => ValueKind::Link,
        }
    }

    /// Encodes the words that follow the flags of this record.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Record::Commit {
                revision,
                root,
                previous,
            } => {
                push_word(&mut payload, *revision);
                push_word(&mut payload, *root);
                push_word(&mut payload, *previous);
            }
            Record::Bytes(bytes) | Record::Symbol(bytes) => {
                push_word(&mut payload, bytes.len() as u64);
                push_padded(&mut payload, bytes);
            }
            Record::Number(integer) => push_word(&mut payload, *integer as u64),
            Record::Closure { value, name } => {
                push_word(&mut payload, *value);
                push_word(&mut payload, name.len() as u64);
                push_padded(&mut payload, name.as_bytes());
            }
            Record::Array(indices) => {
                push_word(&mut payload, indices.len() as u64);
                for index in indices {
                    push_word(&mut payload, *index);
                }
            }
            Record::Link { head, tail } => {
                push_word(&mut payload, *head);
                push_word(&mut payload, *tail);
            }
        }
        payload
    }
}

fn push_word(payload: &mut Vec<u8>, word: u64) {
    payload.extend_from_slice(&word.to_le_bytes());
}

fn push_padded(payload: &mut Vec<u8>, bytes: &[u8]) {
    payload.extend_from_slice(bytes);
    payload.resize(payload.len() + padded(bytes.len()) - bytes.len(), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(records: &[(ValueKind, Vec<u8>)]) -> (Vec<u8>, Vec<u64>) {
        let mut bytes = Header::empty().encode().to_vec();
        let mut indices = vec![];
        for (kind, payload) in records {
            let index = bytes.len() as u64;
            bytes.extend_from_slice(&Flags::pack(*kind, index).to_le_bytes());
            bytes.extend_from_slice(payload);
            indices.push(index);
        }
        (bytes, indices)
    }

    #[test]
    fn header_round_trips() {
        let header = Header {
            length: 128,
            revision: 2,
            latest: 96,
        };
        let mut bytes = header.encode().to_vec();
        bytes.resize(128, 0);
        assert_eq!(Header::read(&bytes).unwrap(), Some(header));
    }

    #[test]
    fn zeroed_region_has_no_header() {
        assert_eq!(Header::read(&[0; 256]).unwrap(), None);
        assert_eq!(Header::read(&[]).unwrap(), None);
    }

    #[test]
    fn foreign_region_is_rejected() {
        let error = Header::read(b"definitely not an rvm heap, just some text bytes.....").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::User);
        assert_eq!(error.message(), Some("not a heap"));
    }

    #[test]
    fn records_decode_to_what_was_encoded() {
        let records = vec![
            Record::Bytes(b"hello"),
            Record::Number(-42),
            Record::Symbol(b"sym"),
            Record::Closure {
                value: 0,
                name: "add",
            },
            Record::Array(vec![64, 80]),
            Record::Link { head: 64, tail: 80 },
            Record::Commit {
                revision: 1,
                root: 64,
                previous: 0,
            },
        ];
        let encoded = records
            .iter()
            .map(|record| (record.kind(), record.payload()))
            .collect::<Vec<_>>();
        let (bytes, indices) = region(&encoded);

        for (record, index) in records.iter().zip(indices) {
            let raw = Raw::read(&bytes, index).unwrap();
            assert_eq!(raw.size() % WORD, 0);
            assert_eq!(&raw.decode().unwrap(), record);
        }
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let (bytes, indices) = region(&[(ValueKind::Bytes, Record::Bytes(b"0123456789").payload())]);
        let error = Raw::read(&bytes[..bytes.len() - 8], indices[0]).unwrap_err();
        assert!(error.to_string().starts_with("corrupt heap: truncated record"));
    }

    #[test]
    fn misplaced_index_is_corrupt() {
        let (bytes, _) = region(&[(ValueKind::Number, Record::Number(1).payload())]);
        assert!(Raw::read(&bytes, 68).is_err());
        assert!(Raw::read(&bytes, 0).is_err());
    }
}
