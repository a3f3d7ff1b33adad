//! Command construction.
//!
//! A [`Command`] is an argv of binary-safe tokens. The typed wrappers on
//! `Client` build these mechanically; arbitrary or not-yet-wrapped commands
//! can be assembled directly:
//!
//! ```no_run
//! use redis_bridge::Command;
//!
//! let cmd = Command::new("SET").arg("answer").arg(42);
//! ```

use bytes::Bytes;

/// A single Redis command: the command name followed by its arguments.
#[derive(Debug, Clone)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl AsRef<str>) -> Command {
        Command {
            args: vec![Bytes::copy_from_slice(name.as_ref().as_bytes())],
        }
    }

    /// Builds a command from raw argv tokens.
    pub fn from_args(args: Vec<Bytes>) -> Command { Command { args } }

    /// Appends one argument. Bytes are copied, so the source need not
    /// outlive the command.
    #[must_use]
    pub fn arg(mut self, arg: impl ToArg) -> Command {
        self.args.push(arg.to_arg());
        self
    }

    pub(crate) fn into_args(self) -> Vec<Bytes> { self.args }
}

/// Conversion of argument values into binary-safe command tokens.
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes { self.clone() }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes { Bytes::copy_from_slice(self) }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes { Bytes::copy_from_slice(self) }
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes { Bytes::copy_from_slice(self.as_bytes()) }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes { Bytes::copy_from_slice(self.as_bytes()) }
}

macro_rules! to_arg_via_display {
    ($($ty:ty),*) => {
        $(impl ToArg for $ty {
            fn to_arg(&self) -> Bytes { Bytes::from(self.to_string().into_bytes()) }
        })*
    };
}

to_arg_via_display!(i32, i64, u32, u64, usize, f64);
