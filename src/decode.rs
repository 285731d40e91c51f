use crate::token::{Location, Token};
use std::fmt;
use thiserror::Error;

/// Named storage cells of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Acc,
    Ret,
    R0,
    R1,
    R2,
    R3,
    Pc,
}

impl Register {
    pub const ALL: [Register; 7] = [
        Register::Acc,
        Register::Ret,
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::Pc,
    ];

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s {
            "ACC" => Register::Acc,
            "RET" => Register::Ret,
            "R0" => Register::R0,
            "R1" => Register::R1,
            "R2" => Register::R2,
            "R3" => Register::R3,
            "PC" => Register::Pc,
            _ => return None,
        })
    }

    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Register::Acc => "ACC",
            Register::Ret => "RET",
            Register::R0 => "R0",
            Register::R1 => "R1",
            Register::R2 => "R2",
            Register::R3 => "R3",
            Register::Pc => "PC",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Immediate(i8),
    Register(Register),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub loc: Location,
    pub kind: OperandKind,
}

impl Operand {
    pub const fn immediate(loc: Location, value: i8) -> Self {
        Self {
            loc,
            kind: OperandKind::Immediate(value),
        }
    }

    pub const fn register(loc: Location, reg: Register) -> Self {
        Self {
            loc,
            kind: OperandKind::Register(reg),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, OperandKind::Immediate(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperandKind::Immediate(n) => write!(f, "{n}"),
            OperandKind::Register(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeKind {
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Dump,
}

impl OpcodeKind {
    pub const ALL: [OpcodeKind; 6] = [
        OpcodeKind::Mov,
        OpcodeKind::Add,
        OpcodeKind::Sub,
        OpcodeKind::Mul,
        OpcodeKind::Div,
        OpcodeKind::Dump,
    ];

    /// Mnemonics are matched case-sensitively.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s {
            "MOV" => OpcodeKind::Mov,
            "ADD" => OpcodeKind::Add,
            "SUB" => OpcodeKind::Sub,
            "MUL" => OpcodeKind::Mul,
            "DIV" => OpcodeKind::Div,
            "DUMP" => OpcodeKind::Dump,
            _ => return None,
        })
    }

    pub const fn mnemonic(&self) -> &'static str {
        match self {
            OpcodeKind::Mov => "MOV",
            OpcodeKind::Add => "ADD",
            OpcodeKind::Sub => "SUB",
            OpcodeKind::Mul => "MUL",
            OpcodeKind::Div => "DIV",
            OpcodeKind::Dump => "DUMP",
        }
    }

    pub const fn arity(&self) -> usize {
        match self {
            OpcodeKind::Mov
            | OpcodeKind::Add
            | OpcodeKind::Sub
            | OpcodeKind::Mul
            | OpcodeKind::Div => 2,
            OpcodeKind::Dump => 1,
        }
    }
}

impl fmt::Display for OpcodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// An opcode together with exactly the operands it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Mov { dst: Operand, src: Operand },
    Add { dst: Operand, src: Operand },
    Sub { dst: Operand, src: Operand },
    Mul { dst: Operand, src: Operand },
    Div { dst: Operand, src: Operand },
    Dump { src: Operand },
}

impl Op {
    pub const fn kind(&self) -> OpcodeKind {
        match self {
            Op::Mov { .. } => OpcodeKind::Mov,
            Op::Add { .. } => OpcodeKind::Add,
            Op::Sub { .. } => OpcodeKind::Sub,
            Op::Mul { .. } => OpcodeKind::Mul,
            Op::Div { .. } => OpcodeKind::Div,
            Op::Dump { .. } => OpcodeKind::Dump,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub loc: Location,
    pub op: Op,
}

impl Instruction {
    pub const fn kind(&self) -> OpcodeKind {
        self.op.kind()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Mov { dst, src }
            | Op::Add { dst, src }
            | Op::Sub { dst, src }
            | Op::Mul { dst, src }
            | Op::Div { dst, src } => write!(f, "{} {dst}, {src}", self.kind()),
            Op::Dump { src } => write!(f, "{} {src}", self.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{loc}: unknown instruction `{text}`")]
    UnknownOpcode { loc: Location, text: String },
    #[error("{loc}: unknown operand `{text}`")]
    UnknownOperand { loc: Location, text: String },
    #[error("{loc}: malformed integer literal `{text}`")]
    MalformedLiteral { loc: Location, text: String },
    #[error("{loc}: unexpected end of instruction stream: `{opcode}` takes {expected} operand(s), found {found}")]
    UnexpectedEnd {
        loc: Location,
        opcode: OpcodeKind,
        expected: usize,
        found: usize,
    },
}

impl DecodeError {
    pub fn loc(&self) -> Location {
        match self {
            DecodeError::UnknownOpcode { loc, .. }
            | DecodeError::UnknownOperand { loc, .. }
            | DecodeError::MalformedLiteral { loc, .. }
            | DecodeError::UnexpectedEnd { loc, .. } => *loc,
        }
    }
}

/// Groups `tokens` into instructions. Stops at the first malformed
/// instruction; nothing decoded before it is returned.
pub fn decode(tokens: &[Token<'_>]) -> Result<Vec<Instruction>, DecodeError> {
    let decoder = Decoder::new(tokens);
    decoder.decode()
}

#[derive(Clone, Debug)]
struct Decoder<'t, 'a> {
    tokens: &'t [Token<'a>],
    cursor: usize,
    instructions: Vec<Instruction>,
}

impl<'t, 'a> Decoder<'t, 'a> {
    fn new(tokens: &'t [Token<'a>]) -> Self {
        Self {
            tokens,
            cursor: 0,
            instructions: Vec::new(),
        }
    }
}

impl<'t, 'a> Decoder<'t, 'a> {
    fn decode(mut self) -> Result<Vec<Instruction>, DecodeError> {
        while let Some(token) = self.next_token() {
            let kind =
                OpcodeKind::from_mnemonic(token.text).ok_or_else(|| DecodeError::UnknownOpcode {
                    loc: token.loc,
                    text: token.text.to_owned(),
                })?;
            let op = match kind {
                OpcodeKind::Mov => self.binary(token, kind, |dst, src| Op::Mov { dst, src })?,
                OpcodeKind::Add => self.binary(token, kind, |dst, src| Op::Add { dst, src })?,
                OpcodeKind::Sub => self.binary(token, kind, |dst, src| Op::Sub { dst, src })?,
                OpcodeKind::Mul => self.binary(token, kind, |dst, src| Op::Mul { dst, src })?,
                OpcodeKind::Div => self.binary(token, kind, |dst, src| Op::Div { dst, src })?,
                OpcodeKind::Dump => Op::Dump {
                    src: self.operand(token, kind, 0)?,
                },
            };
            let instruction = Instruction { loc: token.loc, op };
            log::trace!("decoded {}: {instruction}", instruction.loc);
            self.instructions.push(instruction);
        }
        log::debug!("decoded {} instruction(s)", self.instructions.len());
        Ok(self.instructions)
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(token)
    }

    fn binary(
        &mut self,
        opcode: Token<'a>,
        kind: OpcodeKind,
        build: fn(Operand, Operand) -> Op,
    ) -> Result<Op, DecodeError> {
        let dst = self.operand(opcode, kind, 0)?;
        let src = self.operand(opcode, kind, 1)?;
        Ok(build(dst, src))
    }

    /// Consumes operand number `index` of the instruction started by `opcode`.
    fn operand(
        &mut self,
        opcode: Token<'a>,
        kind: OpcodeKind,
        index: usize,
    ) -> Result<Operand, DecodeError> {
        let token = self.next_token().ok_or(DecodeError::UnexpectedEnd {
            loc: opcode.loc,
            opcode: kind,
            expected: kind.arity(),
            found: index,
        })?;
        parse_operand(token)
    }
}

fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

fn parse_operand(token: Token<'_>) -> Result<Operand, DecodeError> {
    if let Some(reg) = Register::from_mnemonic(token.text) {
        return Ok(Operand::register(token.loc, reg));
    }
    if !looks_numeric(token.text) {
        return Err(DecodeError::UnknownOperand {
            loc: token.loc,
            text: token.text.to_owned(),
        });
    }
    let value = token
        .text
        .parse::<i64>()
        .map_err(|_| DecodeError::MalformedLiteral {
            loc: token.loc,
            text: token.text.to_owned(),
        })?;
    // Literals wider than 8 bits keep their low byte.
    Ok(Operand::immediate(token.loc, value as i8))
}
