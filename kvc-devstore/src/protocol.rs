//! # RESP2 Request Parsing and Reply Encoding
//!
//! Parses client requests incrementally out of a `BytesMut` read buffer and
//! renders replies. Both RESP arrays and inline commands are accepted.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Upper bound on arguments per request.
const MAX_ARGS: usize = 1024 * 1024;
/// Upper bound on a single bulk argument.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespError {
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

/// Incremental request parser.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one request from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the request is not
    /// complete yet.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let parsed = if buf[0] == b'*' {
            parse_array(&buf[..])?
        } else {
            parse_inline(&buf[..])?
        };
        Ok(parsed.map(|(args, consumed)| {
            buf.advance(consumed);
            args
        }))
    }
}

fn parse_array(data: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some((line, mut pos)) = read_line(data, 0) else {
        return Ok(None);
    };
    let count = parse_len(&line[1..])?;
    if count > MAX_ARGS {
        return Err(RespError::Protocol("too many arguments"));
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some((line, next)) = read_line(data, pos) else {
            return Ok(None);
        };
        if line.first() != Some(&b'$') {
            return Err(RespError::Protocol("expected bulk string"));
        }
        let len = parse_len(&line[1..])?;
        if len > MAX_BULK_LEN {
            return Err(RespError::Protocol("bulk string too long"));
        }
        if data.len() < next + len + 2 {
            return Ok(None);
        }
        if &data[next + len..next + len + 2] != b"\r\n" {
            return Err(RespError::Protocol("bulk string missing CRLF"));
        }
        args.push(data[next..next + len].to_vec());
        pos = next + len + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(data: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some(end) = data.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let line = match data[..end].last() {
        Some(b'\r') => &data[..end - 1],
        _ => &data[..end],
    };
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Ok(Some((args, end + 1)))
}

fn read_line(data: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = data.get(start..)?;
    let idx = rest.windows(2).position(|window| window == b"\r\n")?;
    Some((&rest[..idx], start + idx + 2))
}

fn parse_len(digits: &[u8]) -> Result<usize, RespError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RespError::Protocol("invalid length"));
    }
    let mut value: usize = 0;
    for &b in digits {
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_ok() -> Vec<u8> {
    resp_simple("OK")
}

/// Error reply; `message` starts with the error code (`ERR`, `NOAUTH`, ...).
pub fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Multi-bulk reply from already encoded items.
pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        buf.extend_from_slice(&item);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_array() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n"[..]);
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_partial_array() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nke"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"y\r\n");
        assert!(parser.parse(&mut buf).unwrap().is_some());
    }

    #[test]
    fn parses_pipelined_requests_one_at_a_time() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$5\r\nMULTI\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec![b"PING".to_vec()]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec![b"MULTI".to_vec()]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn parses_inline_command() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"SET  key value\r\n"[..]);
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);
    }

    #[test]
    fn rejects_non_bulk_argument() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n:3\r\n"[..]);
        assert_eq!(parser.parse(&mut buf), Err(RespError::Protocol("expected bulk string")));
    }

    #[test]
    fn encodes_array_of_replies() {
        let reply = resp_array(vec![resp_ok(), resp_integer(1), resp_null()]);
        assert_eq!(reply, b"*3\r\n+OK\r\n:1\r\n$-1\r\n".to_vec());
    }
}
