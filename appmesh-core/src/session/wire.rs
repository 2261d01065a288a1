//! EIS wire format.
//!
//! Every message is a 16-byte header followed by 4-byte aligned arguments,
//! all in native byte order:
//!
//! ```text
//! | object id: u64 | length (incl. header): u32 | opcode: u32 | args ... |
//! ```
//!
//! Strings are a `u32` length that counts the trailing NUL, the bytes, the
//! NUL, then zero padding to a 4-byte boundary.  A length of 0 encodes a
//! null string.  New object ids travel as plain `u64`.

use std::io::{self, Read};

use thiserror::Error;

pub const HEADER_LEN: usize = 16;

/// Upper bound on a single message; anything larger is treated as corruption.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("string argument is not NUL-terminated UTF-8")]
    BadString,

    #[error("invalid message length {0}")]
    BadLength(usize),
}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// A decoded message with its raw argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub object_id: u64,
    pub opcode: u32,
    pub body: Vec<u8>,
}

impl Message {
    pub fn args(&self) -> ArgReader<'_> {
        ArgReader::new(&self.body)
    }
}

/// Builds one outgoing request.
#[derive(Debug)]
pub struct MessageBuilder {
    object_id: u64,
    opcode: u32,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(object_id: u64, opcode: u32) -> Self {
        Self {
            object_id,
            opcode,
            body: Vec::new(),
        }
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.body.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.body.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        let len = value.len() + 1;
        self.body.extend_from_slice(&(len as u32).to_ne_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(0);
        self.body.resize(self.body.len() + padding(len), 0);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let total = HEADER_LEN + self.body.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&self.object_id.to_ne_bytes());
        out.extend_from_slice(&(total as u32).to_ne_bytes());
        out.extend_from_slice(&self.opcode.to_ne_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Cursor over a message body.
#[derive(Debug)]
pub struct ArgReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(WireError::Truncated {
                offset: self.pos,
                needed: n,
            }),
        }
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_ne_bytes(bytes))
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_ne_bytes(bytes))
    }

    /// Returns `None` for a null string.
    pub fn string(&mut self) -> Result<Option<String>, WireError> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(len)?;
        self.take(padding(len))?;
        match raw.split_last() {
            Some((0, text)) => std::str::from_utf8(text)
                .map(|s| Some(s.to_owned()))
                .map_err(|_| WireError::BadString),
            _ => Err(WireError::BadString),
        }
    }
}

/// Read exactly one message, blocking until it is complete.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let mut args = ArgReader::new(&header);
    let object_id = args.u64()?;
    let len = args.u32()? as usize;
    let opcode = args.u32()?;

    if !(HEADER_LEN..=MAX_MESSAGE_LEN).contains(&len) || len % 4 != 0 {
        return Err(WireError::BadLength(len).into());
    }

    let mut body = vec![0u8; len - HEADER_LEN];
    reader.read_exact(&mut body)?;
    Ok(Message {
        object_id,
        opcode,
        body,
    })
}
