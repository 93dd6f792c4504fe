//! # Command Builder
//!
//! Purpose: Represent an arbitrary store verb and its arguments without the
//! connection knowing any verb's signature.
//!
//! ## Design Principles
//! 1. **Generic Dispatch**: A command is just a name plus ordered arguments.
//! 2. **Tagged Keys**: Arguments are tagged as keys or data so the connection
//!    can namespace keys without per-verb tables.
//! 3. **Binary-Safe**: Every argument is raw bytes on the wire.

/// One command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// A key; receives the connection's key prefix.
    Key(Vec<u8>),
    /// Anything else (values, options, numbers).
    Data(Vec<u8>),
}

impl Arg {
    /// Raw bytes before any prefixing.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Arg::Key(bytes) | Arg::Data(bytes) => bytes,
        }
    }
}

/// A store command ready to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Arg>,
}

/// Shorthand for [`Command::new`].
pub fn cmd(name: impl Into<String>) -> Command {
    Command::new(name)
}

impl Command {
    /// Creates a command with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Appends a key argument.
    pub fn key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.push_key(key);
        self
    }

    /// Appends several key arguments in order.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        for key in keys {
            self.push_key(key);
        }
        self
    }

    /// Appends a data argument.
    pub fn arg<A: ToArg>(mut self, arg: A) -> Self {
        self.push_arg(arg);
        self
    }

    /// In-place variant of [`Command::key`].
    pub fn push_key(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.args.push(Arg::Key(key.as_ref().to_vec()));
        self
    }

    /// In-place variant of [`Command::arg`].
    pub fn push_arg<A: ToArg>(&mut self, arg: A) -> &mut Self {
        let mut bytes = Vec::new();
        arg.write_arg(&mut bytes);
        self.args.push(Arg::Data(bytes));
        self
    }

    /// Verb name as given by the caller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in submission order.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }
}

/// Conversion into a raw command argument.
pub trait ToArg {
    fn write_arg(&self, out: &mut Vec<u8>);
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn write_arg(&self, out: &mut Vec<u8>) {
        (**self).write_arg(out)
    }
}

impl ToArg for [u8] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for Vec<u8> {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for str {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToArg for String {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToArg for u64 {
    fn write_arg(&self, out: &mut Vec<u8>) {
        let (digits, len) = encode_u64(*self);
        out.extend_from_slice(&digits[..len]);
    }
}

impl ToArg for u32 {
    fn write_arg(&self, out: &mut Vec<u8>) {
        u64::from(*self).write_arg(out)
    }
}

impl ToArg for usize {
    fn write_arg(&self, out: &mut Vec<u8>) {
        (*self as u64).write_arg(out)
    }
}

impl ToArg for i64 {
    fn write_arg(&self, out: &mut Vec<u8>) {
        if *self < 0 {
            out.push(b'-');
        }
        self.unsigned_abs().write_arg(out)
    }
}

pub(crate) fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps number formatting allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
