//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands and parse store replies without external
//! dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use crate::command::{encode_u64, Arg, Command};

/// Largest bulk string the protocol allows (512MB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Array slots reserved up front; larger arrays grow as items arrive.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK, +QUEUED, +PONG style replies.
    Status(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for the null bulk.
    Bulk(Option<Vec<u8>>),
    /// *... multi-bulk replies.
    Array(Vec<Reply>),
    /// *-1, the null multi-bulk (aborted EXEC).
    Nil,
}

impl Reply {
    /// True for `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(text) if text == b"OK")
    }

    /// Integer payload, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Error message, if this is an error reply.
    pub fn as_error(&self) -> Option<&[u8]> {
        match self {
            Reply::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Failure while reading a reply.
#[derive(Debug)]
pub(crate) enum RespError {
    Io(std::io::Error),
    Protocol(&'static str),
}

impl From<std::io::Error> for RespError {
    fn from(err: std::io::Error) -> Self {
        RespError::Io(err)
    }
}

type RespResult<T> = Result<T, RespError>;

/// Encodes a command as a RESP2 array, prefixing key arguments.
pub(crate) fn encode_command(command: &Command, key_prefix: &[u8], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, command.args().len() + 1);
    out.extend_from_slice(b"\r\n");
    push_bulk(out, &[command.name().as_bytes()]);
    for arg in command.args() {
        match arg {
            Arg::Key(key) => push_bulk(out, &[key_prefix, key]),
            Arg::Data(data) => push_bulk(out, &[data]),
        }
    }
}

fn push_bulk(out: &mut Vec<u8>, parts: &[&[u8]]) {
    let len: usize = parts.iter().map(|part| part.len()).sum();
    out.push(b'$');
    push_usize(out, len);
    out.extend_from_slice(b"\r\n");
    for part in parts {
        out.extend_from_slice(part);
    }
    out.extend_from_slice(b"\r\n");
}

/// Reads one reply from the buffered reader.
pub(crate) fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(RespError::Protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::Status(line_buf[1..].to_vec())),
        b'-' => Ok(Reply::Error(line_buf[1..].to_vec())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        _ => Err(RespError::Protocol("unknown reply type")),
    }
}

fn parse_bulk_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(RespError::Protocol("bulk string exceeds 512MB"));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(RespError::Protocol("bulk string missing CRLF"));
    }

    line_buf.clear();
    Ok(Reply::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    if len < 0 {
        return Ok(Reply::Nil);
    }

    let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC_ITEMS));
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(Reply::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> RespResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(RespError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "store closed the connection",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(RespError::Protocol("line missing CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    if data.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    let (digits, len) = encode_u64(value as u64);
    out.extend_from_slice(&digits[..len]);
}
