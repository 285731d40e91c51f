//! Tokenizer, decoder and interpreter for a tiny 8-bit register machine.
//!
//! Source text flows through three stages, each run to completion before
//! the next starts:
//!
//! ```text
//! tokenize(&str) -> Vec<Token>
//! decode(&[Token]) -> Vec<Instruction>
//! execute(&[Instruction], out) -> Registers
//! ```
//!
//! ```
//! let mut out = Vec::<u8>::new();
//! asm8_interpreter::run("MOV ACC, 34\nADD ACC, 35\nDUMP ACC", &mut out).unwrap();
//! assert_eq!(out, b"69\n");
//! ```

pub mod decode;
pub mod machine;
pub mod token;

pub use decode::{decode, DecodeError, Instruction, Op, OpcodeKind, Operand, OperandKind, Register};
pub use machine::{execute, Machine, Registers, RuntimeError};
pub use token::{tokenize, Location, Token};

use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn loc(&self) -> Location {
        match self {
            Error::Decode(e) => e.loc(),
            Error::Runtime(e) => e.loc(),
        }
    }
}

/// Tokenizes, decodes and executes `source`, writing `DUMP` output to `out`.
///
/// Decode errors stop before anything runs. Runtime errors stop mid-program;
/// whatever was already written to `out` stays there.
pub fn run<W: Write>(source: &str, out: &mut W) -> Result<Registers, Error> {
    let tokens = tokenize(source);
    let program = decode(&tokens)?;
    Ok(execute(&program, out)?)
}
