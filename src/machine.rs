use crate::decode::{Instruction, Op, Operand, OperandKind, Register};
use crate::token::Location;
use std::io::Write;
use thiserror::Error;

/// The register file. Every cell starts at zero.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    acc: i8,
    ret: i8,
    r0: i8,
    r1: i8,
    r2: i8,
    r3: i8,
    pc: i8,
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nRegisters: {{")?;
        for reg in Register::ALL {
            writeln!(f, "    {:>3}: {}", reg.mnemonic(), self.get(reg))?;
        }
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn get(&self, reg: Register) -> i8 {
        match reg {
            Register::Acc => self.acc,
            Register::Ret => self.ret,
            Register::R0 => self.r0,
            Register::R1 => self.r1,
            Register::R2 => self.r2,
            Register::R3 => self.r3,
            Register::Pc => self.pc,
        }
    }

    #[inline(always)]
    pub fn set(&mut self, reg: Register, value: i8) {
        let cell = match reg {
            Register::Acc => &mut self.acc,
            Register::Ret => &mut self.ret,
            Register::R0 => &mut self.r0,
            Register::R1 => &mut self.r1,
            Register::R2 => &mut self.r2,
            Register::R3 => &mut self.r3,
            Register::Pc => &mut self.pc,
        };
        *cell = value;
    }

    /// Immediates read their embedded value, registers their current cell.
    pub fn read(&self, operand: Operand) -> i8 {
        match operand.kind {
            OperandKind::Immediate(value) => value,
            OperandKind::Register(reg) => self.get(reg),
        }
    }

    /// Returns `Err` if `operand` is an immediate; otherwise stores `value`
    /// in the named cell.
    pub fn write(
        &mut self,
        operand: Operand,
        value: i8,
        loc: Location,
    ) -> Result<(), RuntimeError> {
        match operand.kind {
            OperandKind::Register(reg) => {
                self.set(reg, value);
                Ok(())
            }
            OperandKind::Immediate(_) => Err(RuntimeError::InvalidDestination {
                loc,
                operand: operand.loc,
            }),
        }
    }

    pub fn pc(&self) -> i8 {
        self.pc
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{loc}: division by zero")]
    DivisionByZero { loc: Location },
    #[error("{loc}: cannot write to the immediate operand at {operand}")]
    InvalidDestination { loc: Location, operand: Location },
    #[error("{loc}: program counter set to {written}, next fetch at {pc} is outside of 0..={len}")]
    ProgramCounterOutOfRange {
        loc: Location,
        written: i8,
        pc: i8,
        len: usize,
    },
    #[error("{loc}: program has {len} instructions, more than an 8-bit program counter can address")]
    ProgramTooLong { loc: Location, len: usize },
    #[error("{loc}: step limit of {limit} exceeded")]
    StepLimitExceeded { loc: Location, limit: u64 },
    #[error("{loc}: failed to write output: {source}")]
    Output {
        loc: Location,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    pub fn loc(&self) -> Location {
        match self {
            RuntimeError::DivisionByZero { loc }
            | RuntimeError::InvalidDestination { loc, .. }
            | RuntimeError::ProgramCounterOutOfRange { loc, .. }
            | RuntimeError::ProgramTooLong { loc, .. }
            | RuntimeError::StepLimitExceeded { loc, .. }
            | RuntimeError::Output { loc, .. } => *loc,
        }
    }
}

/// Runs `program` to completion, writing every `DUMP` to `out`.
pub fn execute<W: Write>(program: &[Instruction], out: &mut W) -> Result<Registers, RuntimeError> {
    let machine = Machine::new(program);
    machine.run(out)
}

/// Fetch-decode-execute loop over a decoded program.
///
/// The loop re-reads the `PC` cell before every fetch, so a program that
/// writes `PC` through an ordinary opcode jumps on the next iteration. The
/// automatic advance still applies after such a write: `MOV PC, 3` resumes
/// at instruction 4.
#[derive(Clone, Debug)]
pub struct Machine<'p> {
    program: &'p [Instruction],
    registers: Registers,
    step_limit: Option<u64>,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p [Instruction]) -> Self {
        Self {
            program,
            registers: Registers::new(),
            step_limit: None,
        }
    }

    /// Stops execution with [`RuntimeError::StepLimitExceeded`] once `limit`
    /// instructions have run.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn run<W: Write>(mut self, out: &mut W) -> Result<Registers, RuntimeError> {
        let len = self.program.len();
        if len > i8::MAX as usize {
            return Err(RuntimeError::ProgramTooLong {
                loc: self.program[i8::MAX as usize].loc,
                len,
            });
        }
        log::debug!("executing {len} instruction(s)");

        let mut steps: u64 = 0;
        let mut last = Location::default();
        let mut written: i8 = 0;
        loop {
            let pc = self.registers.pc();
            let index = match usize::try_from(pc) {
                Ok(index) if index < len => index,
                Ok(index) if index == len => break,
                _ => {
                    return Err(RuntimeError::ProgramCounterOutOfRange {
                        loc: last,
                        written,
                        pc,
                        len,
                    })
                }
            };
            if let Some(limit) = self.step_limit {
                if steps >= limit {
                    return Err(RuntimeError::StepLimitExceeded {
                        loc: self.program[index].loc,
                        limit,
                    });
                }
            }
            let instruction = self.program[index];
            log::trace!("{pc:>3} {}: {instruction}", instruction.loc);
            self.step(instruction, out)?;
            written = self.registers.pc();
            self.registers.set(Register::Pc, written.wrapping_add(1));
            last = instruction.loc;
            steps += 1;
        }
        log::debug!("halted after {steps} step(s)");
        Ok(self.registers)
    }

    fn step<W: Write>(&mut self, instruction: Instruction, out: &mut W) -> Result<(), RuntimeError> {
        let loc = instruction.loc;
        match instruction.op {
            Op::Mov { dst, src } => {
                let value = self.registers.read(src);
                self.registers.write(dst, value, loc)
            }
            Op::Add { dst, src } => self.arithmetic(dst, src, loc, i8::wrapping_add),
            Op::Sub { dst, src } => self.arithmetic(dst, src, loc, i8::wrapping_sub),
            Op::Mul { dst, src } => self.arithmetic(dst, src, loc, i8::wrapping_mul),
            Op::Div { dst, src } => {
                if self.registers.read(src) == 0 {
                    return Err(RuntimeError::DivisionByZero { loc });
                }
                self.arithmetic(dst, src, loc, i8::wrapping_div)
            }
            Op::Dump { src } => {
                let value = self.registers.read(src);
                writeln!(out, "{value}").map_err(|source| RuntimeError::Output { loc, source })
            }
        }
    }

    #[inline(always)]
    fn arithmetic(
        &mut self,
        dst: Operand,
        src: Operand,
        loc: Location,
        apply: fn(i8, i8) -> i8,
    ) -> Result<(), RuntimeError> {
        let value = apply(self.registers.read(dst), self.registers.read(src));
        self.registers.write(dst, value, loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use crate::token::tokenize;

    fn run_source(source: &str) -> (Result<Registers, RuntimeError>, String) {
        let program = decode(&tokenize(source)).unwrap();
        let mut out = Vec::<u8>::new();
        let result = execute(&program, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn registers_start_at_zero() {
        let registers = Registers::new();
        for reg in Register::ALL {
            assert_eq!(registers.get(reg), 0);
        }
    }

    #[test]
    fn add() {
        let (result, out) = run_source("MOV ACC,34\nADD ACC,35\nDUMP ACC");
        assert!(result.is_ok());
        assert_eq!(out, "69\n");
    }

    #[test]
    fn add_wraps() {
        let (result, out) = run_source("MOV ACC,120\nADD ACC,10\nDUMP ACC");
        assert_eq!(result.unwrap().get(Register::Acc), -126);
        assert_eq!(out, "-126\n");
    }

    #[test]
    fn sub_mul_div() {
        let source = "MOV R0, 7\nSUB R0, 10\nDUMP R0\n\
                      MOV R1, 16\nMUL R1, 8\nDUMP R1\n\
                      MOV R2, -7\nDIV R2, 2\nDUMP R2\n\
                      MOV R3, -128\nDIV R3, -1\nDUMP R3";
        let (result, out) = run_source(source);
        assert!(result.is_ok());
        assert_eq!(out, "-3\n-128\n-3\n-128\n");
    }

    #[test]
    fn register_to_register() {
        let (result, out) = run_source("MOV: R1, 69\n\nMOV: R0, R1\nMOV RET, R0\nDUMP RET");
        let registers = result.unwrap();
        assert_eq!(registers.get(Register::R0), 69);
        assert_eq!(registers.get(Register::R1), 69);
        assert_eq!(out, "69\n");
    }

    #[test]
    fn division_by_zero_halts() {
        let (result, out) = run_source("MOV ACC,5\nMOV R0,0\nDIV ACC,R0\nDUMP ACC");
        let err = result.unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero { loc } if loc == Location::new(2, 0)));
        assert_eq!(out, "");
    }

    #[test]
    fn output_before_failure_is_kept() {
        let (result, out) = run_source("DUMP 1\nDIV ACC, 0\nDUMP 2");
        assert!(result.is_err());
        assert_eq!(out, "1\n");
    }

    #[test]
    fn immediate_destination() {
        let (result, _) = run_source("DUMP 0\nADD 5, ACC");
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidDestination { loc, operand }
                if loc == Location::new(1, 0) && operand == Location::new(1, 4)
        ));
        assert_eq!(err.to_string(), "1:0: cannot write to the immediate operand at 1:4");
    }

    #[test]
    fn empty_program() {
        let (result, out) = run_source("");
        assert_eq!(result.unwrap(), Registers::new());
        assert_eq!(out, "");
    }

    #[test]
    fn pc_reads_current_index() {
        let (result, out) = run_source("DUMP PC\nDUMP PC\nDUMP PC");
        assert_eq!(result.unwrap().pc(), 3);
        assert_eq!(out, "0\n1\n2\n");
    }

    #[test]
    fn writing_pc_jumps_on_next_iteration() {
        // MOV PC, 2 leaves 2 in the cell, the advance makes it 3.
        let source = "MOV PC, 2\nDUMP 1\nDUMP 2\nDUMP 3\nDUMP PC";
        let (result, out) = run_source(source);
        assert!(result.is_ok());
        assert_eq!(out, "3\n4\n");
    }

    #[test]
    fn backward_jump_loops_until_step_limit() {
        // 255 truncates to -1, the advance brings PC back to 0.
        let program = decode(&tokenize("ADD R0, 1\nMOV PC, 255")).unwrap();
        let mut out = Vec::<u8>::new();
        let err = Machine::new(&program)
            .with_step_limit(10)
            .run(&mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::StepLimitExceeded { loc, limit: 10 } if loc == Location::new(0, 0)
        ));
    }

    #[test]
    fn jump_to_end_terminates() {
        let (result, out) = run_source("MOV PC, 1\nDUMP 9");
        assert!(result.is_ok());
        assert_eq!(out, "");
    }

    #[test]
    fn jump_out_of_range() {
        let (result, out) = run_source("DUMP 1\nMOV PC, 20\nDUMP 2");
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ProgramCounterOutOfRange { loc, written: 20, pc: 21, len: 3 } if loc == Location::new(1, 0)
        ));
        assert_eq!(out, "1\n");

        let (result, _) = run_source("MOV PC, -5");
        assert!(matches!(
            result.unwrap_err(),
            RuntimeError::ProgramCounterOutOfRange { pc: -4, .. }
        ));
    }

    #[test]
    fn out_of_range_reports_written_pc() {
        // 127 wraps to -128 on the advance.
        let (result, out) = run_source("MOV PC, 127\nDUMP 1");
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ProgramCounterOutOfRange { written: 127, pc: -128, len: 2, .. }
        ));
        assert_eq!(
            err.to_string(),
            "0:0: program counter set to 127, next fetch at -128 is outside of 0..=2"
        );
        assert_eq!(out, "");
    }

    #[test]
    fn program_too_long() {
        let source = "DUMP 0\n".repeat(128);
        let (result, out) = run_source(&source);
        assert!(matches!(
            result.unwrap_err(),
            RuntimeError::ProgramTooLong { len: 128, .. }
        ));
        assert_eq!(out, "");

        let source = "ADD ACC, 1\n".repeat(127);
        let (result, _) = run_source(&source);
        assert_eq!(result.unwrap().get(Register::Acc), 127);
    }

    #[test]
    fn step_limit() {
        let program = decode(&tokenize("DUMP 1\nDUMP 2\nDUMP 3")).unwrap();
        let mut out = Vec::<u8>::new();
        let err = Machine::new(&program)
            .with_step_limit(2)
            .run(&mut out)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::StepLimitExceeded { loc, limit: 2 } if loc == Location::new(2, 0)));
        assert_eq!(out, b"1\n2\n");
    }

    #[test]
    fn execution_is_repeatable() {
        let program = decode(&tokenize("MOV ACC, 3\nMUL ACC, ACC\nDUMP ACC")).unwrap();
        let (mut first, mut second) = (Vec::<u8>::new(), Vec::<u8>::new());
        let a = execute(&program, &mut first).unwrap();
        let b = execute(&program, &mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(first, second);
    }
}
