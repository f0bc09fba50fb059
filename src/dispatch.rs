//! Request validation and arithmetic dispatch.
//!
//! `process` is total: every problem with a request is reported through the
//! response's `error_code`, never as a Rust error.
//!
//! Arithmetic is 32-bit two's-complement with wraparound, since the wire has
//! no way to report overflow. Division rounds toward negative infinity.

use crate::protocol::{Request, Response};
use std::fmt;
use std::str::FromStr;

/// Supported operations, keyed by wire op code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Add = 0,
    Subtract = 1,
    Or = 2,
    And = 3,
    Divide = 4,
    Multiply = 5,
}

impl OpCode {
    pub const ALL: [OpCode; 6] = [
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Or,
        OpCode::And,
        OpCode::Divide,
        OpCode::Multiply,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(OpCode::Add),
            1 => Some(OpCode::Subtract),
            2 => Some(OpCode::Or),
            3 => Some(OpCode::And),
            4 => Some(OpCode::Divide),
            5 => Some(OpCode::Multiply),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Name sent as `op_name` by the bundled client.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Add => "addition",
            OpCode::Subtract => "subtraction",
            OpCode::Or => "or",
            OpCode::And => "and",
            OpCode::Divide => "division",
            OpCode::Multiply => "multiplication",
        }
    }

    pub fn symbol(self) -> char {
        match self {
            OpCode::Add => '+',
            OpCode::Subtract => '-',
            OpCode::Or => '|',
            OpCode::And => '&',
            OpCode::Divide => '/',
            OpCode::Multiply => '*',
        }
    }

    /// Apply the operation. `None` only for division by zero.
    pub fn apply(self, a: i32, b: i32) -> Option<i32> {
        match self {
            OpCode::Add => Some(a.wrapping_add(b)),
            OpCode::Subtract => Some(a.wrapping_sub(b)),
            OpCode::Or => Some(a | b),
            OpCode::And => Some(a & b),
            OpCode::Divide => floor_div(a, b),
            OpCode::Multiply => Some(a.wrapping_mul(b)),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognised operation name, symbol, or code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation '{0}'")]
pub struct UnknownOp(pub String);

impl FromStr for OpCode {
    type Err = UnknownOp;

    /// Accepts the op name, its symbol, or its numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return OpCode::from_u8(code).ok_or_else(|| UnknownOp(s.to_string()));
        }
        OpCode::ALL
            .into_iter()
            .find(|op| {
                op.name().eq_ignore_ascii_case(trimmed)
                    || trimmed.chars().eq(std::iter::once(op.symbol()))
            })
            .ok_or_else(|| UnknownOp(s.to_string()))
    }
}

/// Integer division rounding toward negative infinity.
///
/// `i32::MIN / -1` wraps to `i32::MIN`.
pub fn floor_div(a: i32, b: i32) -> Option<i32> {
    if b == 0 {
        return None;
    }
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Validate and execute a request.
///
/// An unknown op code or a zero divisor yields result 0. A `tml` that does
/// not match `13 + op_name_length` marks the response failed but keeps the
/// computed result.
pub fn process(request: &Request) -> Response {
    let (result, mut error) = match OpCode::from_u8(request.op_code) {
        Some(op) => match op.apply(request.operand_one, request.operand_two) {
            Some(value) => (value, false),
            None => (0, true),
        },
        None => (0, true),
    };

    if !request.has_consistent_length() {
        error = true;
    }

    if error {
        Response::failed(result, request.request_id)
    } else {
        Response::ok(result, request.request_id)
    }
}
