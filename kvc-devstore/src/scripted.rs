//! # Scripted Store
//!
//! A blocking one-client server whose replies are written by a test handler,
//! for asserting exact wire traffic and faking store faults.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Receives the command index, its arguments, and the client stream.
pub type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

/// Accepts one client and feeds `expected_commands` requests to `handler`.
///
/// The connection is closed once the script is exhausted.
pub fn spawn_scripted(expected_commands: usize, handler: Handler) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let Ok(read_half) = stream.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(read_half);
        for idx in 0..expected_commands {
            let args = match read_command(&mut reader) {
                Ok(args) => args,
                Err(_) => return,
            };
            handler(idx, args, &mut stream);
        }
    });

    Ok(addr)
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}

/// Writes pre-encoded reply bytes.
pub fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

pub fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{}\r\n", msg).as_bytes());
}

pub fn write_error(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("-{}\r\n", msg).as_bytes());
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{}\r\n", value).as_bytes());
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    write_raw(stream, &buf);
}

pub fn write_null(stream: &mut TcpStream) {
    write_raw(stream, b"$-1\r\n");
}
