//! Register-access command parsing.
//!
//! One command per positional argument, in the form:
//!
//! ```text
//! [:[:]] <address> [= <value>] [@ <delay> [- <repeat>]]
//! ```
//!
//! A leading `:` asks for the register value to be printed in decimal, `::`
//! in hexadecimal. `=value` writes the value to the register. `@delay` waits
//! `delay` milliseconds before the first execution and `-repeat` re-executes
//! the command every `repeat` milliseconds until the program is stopped.
//! Addresses and values accept decimal or hexadecimal (`0x` or `x` prefixed)
//! form; delays are always decimal.

use crate::error::SyntaxError;
use msrflow_abi::{MsrAddr, MsrVal};

/// Display base requested for a printed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Dec,
    Hex,
}

/// One user-specified register access directive. Immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// MSR address, opaque to the agent.
    pub address: MsrAddr,
    /// `Some` when the value should be printed, with the requested base.
    pub display: Option<Base>,
    /// `Some(v)` when the command writes `v` to the register.
    pub write: Option<MsrVal>,
    /// Milliseconds to wait after schedule start before the first execution.
    pub delay: u64,
    /// `Some(period)` when the command repeats every `period` milliseconds.
    pub repeat: Option<u64>,
}

/// Parse an address or value, decimal by default, hexadecimal when prefixed
/// with `x` or `0x`. On failure the reported offset is the position where
/// the number was expected.
fn parse_number(input: &str, pos: usize) -> Result<(u64, usize), SyntaxError> {
    let bytes = input.as_bytes();

    let (radix, digits_at) = if bytes.get(pos) == Some(&b'x') {
        (16, pos + 1)
    } else if bytes.get(pos) == Some(&b'0') && bytes.get(pos + 1) == Some(&b'x') {
        (16, pos + 2)
    } else {
        (10, pos)
    };

    let mut end = digits_at;
    while end < bytes.len() && (bytes[end] as char).is_digit(radix) {
        end += 1;
    }

    if end == digits_at {
        return Err(SyntaxError { offset: pos });
    }

    let value = u64::from_str_radix(&input[digits_at..end], radix)
        .map_err(|_| SyntaxError { offset: pos })?;
    Ok((value, end))
}

/// Parse an optional run of decimal digits. An empty run yields 0, matching
/// the original tool where `@` with no digits means "no delay".
fn parse_decimal_opt(input: &str, pos: usize) -> (u64, usize) {
    let bytes = input.as_bytes();
    let mut end = pos;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == pos {
        return (0, pos);
    }
    match input[pos..end].parse() {
        Ok(value) => (value, end),
        Err(_) => (0, pos),
    }
}

/// Parse one command string.
///
/// On failure, returns the byte offset of the first invalid or unconsumed
/// character; nothing about the partially parsed command is reported.
pub fn parse_command(input: &str) -> Result<Command, SyntaxError> {
    let bytes = input.as_bytes();
    let mut pos = 0;

    let mut display = None;
    if bytes.first() == Some(&b':') {
        pos = 1;
        display = Some(Base::Dec);
        if bytes.get(1) == Some(&b':') {
            pos = 2;
            display = Some(Base::Hex);
        }
    }

    let (address, next) = parse_number(input, pos)?;
    pos = next;

    let mut write = None;
    if bytes.get(pos) == Some(&b'=') {
        let (value, next) = parse_number(input, pos + 1)?;
        write = Some(value);
        pos = next;
    }

    let mut delay = 0;
    let mut repeat = None;
    if bytes.get(pos) == Some(&b'@') {
        let (d, next) = parse_decimal_opt(input, pos + 1);
        delay = d;
        pos = next;

        if bytes.get(pos) == Some(&b'-') {
            let (r, next) = parse_decimal_opt(input, pos + 1);
            repeat = Some(r);
            pos = next;
        }
    }

    if pos != input.len() {
        return Err(SyntaxError { offset: pos });
    }

    Ok(Command {
        address,
        display,
        write,
        delay,
        repeat,
    })
}
