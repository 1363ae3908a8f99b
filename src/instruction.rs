//! The instruction set of emulated programs, and its interpreter.
//!
//! An instruction is an opcode plus the unparsed remainder of its source
//! line; operands are tokenized at execution time, so a malformed operand
//! surfaces as an execution error on the owning process, not as a parse
//! error at program creation.

use std::fmt;
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;

use crate::memory::{MemoryError, MemoryManager};
use crate::multitasking::process::{Process, MAX_SYMBOLS};
use crate::multitasking::ExecCtx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Declare,
    Add,
    Sub,
    Read,
    Write,
    Print,
    Sleep,
    For,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub params: String,
}

/// Unknown opcode at parse time, surfaced to the process creator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownOpcode(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::UnknownOpcode(cmd) => write!(f, "Unknown instruction: {}", cmd),
        }
    }
}

/// Fatal instruction errors; any of these finishes the owning process
#[derive(Debug)]
pub enum ExecError {
    UndefinedVariable(String),
    InvalidAddress(String),
    BadOperand(String),
    SymbolTableFull,
    Memory(MemoryError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::UndefinedVariable(name) => write!(f, "Undefined variable {:?}", name),
            ExecError::InvalidAddress(addr) => write!(f, "Invalid memory address {}", addr),
            ExecError::BadOperand(operand) => write!(f, "Invalid numeric operand {:?}", operand),
            ExecError::SymbolTableFull => write!(f, "Symbol table full"),
            ExecError::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl From<MemoryError> for ExecError {
    fn from(e: MemoryError) -> Self {
        ExecError::Memory(e)
    }
}

impl Instruction {
    pub fn new(opcode: Opcode, params: impl Into<String>) -> Self {
        Self {
            opcode,
            params: params.into(),
        }
    }

    /// Decode one textual instruction, e.g. `DECLARE a 5`
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let source = source.trim();
        let (cmd, params) = source
            .split_once(char::is_whitespace)
            .unwrap_or((source, ""));
        let opcode = match cmd {
            "DECLARE" => Opcode::Declare,
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "READ" => Opcode::Read,
            "WRITE" => Opcode::Write,
            "PRINT" => Opcode::Print,
            "SLEEP" => Opcode::Sleep,
            "FOR" => Opcode::For,
            _ => return Err(ParseError::UnknownOpcode(cmd.to_owned())),
        };
        Ok(Self::new(opcode, params.trim()))
    }

    /// Contribution to the owning process's total-lines-of-code statistic.
    /// `FOR n` counts as `n` lines, everything else as one.
    pub fn line_weight(&self) -> u32 {
        if self.opcode == Opcode::For {
            self.params.trim().parse().unwrap_or(1)
        } else {
            1
        }
    }

    /// Execute this instruction against a process.
    ///
    /// Every call counts one active tick. An `Err` is fatal for the
    /// process; the caller appends the error to the process log and
    /// finishes it.
    pub fn execute(&self, process: &Process, ctx: &ExecCtx<'_>) -> Result<(), ExecError> {
        ctx.ticks.add_active(1);
        let params = self.params.trim();

        match self.opcode {
            Opcode::Print => {
                let text = params
                    .strip_prefix('"')
                    .and_then(|t| t.strip_suffix('"'))
                    .unwrap_or(params);
                let output = {
                    let symbols = process.symbols();
                    substitute_symbols(text, &symbols)
                };
                process.push_log(format!("PRINT: {}", output));
                Ok(())
            },

            Opcode::Declare => {
                let mut parts = params.split_whitespace();
                let name = match parts.next() {
                    Some(name) => name,
                    None => return Ok(()),
                };
                let value = parts
                    .next()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0)
                    .clamp(0, u16::MAX as i64) as u16;

                let mut symbols = process.symbols();
                if symbols.len() >= MAX_SYMBOLS {
                    drop(symbols);
                    process.push_log("Symbol table full. DECLARE ignored.".to_owned());
                    return Ok(());
                }
                symbols.insert(name.to_owned(), value);
                Ok(())
            },

            Opcode::Add | Opcode::Sub => {
                let mut parts = params.split_whitespace();
                let dst = parts.next().unwrap_or("");
                let src1 = parts.next().unwrap_or("");
                let src2 = parts.next().unwrap_or("");

                let mut symbols = process.symbols();
                let a = *symbols
                    .get(src1)
                    .ok_or_else(|| ExecError::UndefinedVariable(src1.to_owned()))?;
                let b = *symbols
                    .get(src2)
                    .ok_or_else(|| ExecError::UndefinedVariable(src2.to_owned()))?;
                let result = if self.opcode == Opcode::Add {
                    a.saturating_add(b)
                } else {
                    a.saturating_sub(b)
                };

                // New destination names count against the symbol capacity,
                // overwrites of existing names do not
                if !symbols.contains_key(dst) && symbols.len() >= MAX_SYMBOLS {
                    return Err(ExecError::SymbolTableFull);
                }
                symbols.insert(dst.to_owned(), result);
                Ok(())
            },

            Opcode::Read => {
                let mut parts = params.split_whitespace();
                let var = parts.next().unwrap_or("");
                let addr = parse_address(parts.next().unwrap_or(""))?;
                let value = ctx.memory.read(process, addr)?;
                process.symbols().insert(var.to_owned(), value);
                process.add_paged_in(1);
                Ok(())
            },

            Opcode::Write => {
                let mut parts = params.split_whitespace();
                let addr = parse_address(parts.next().unwrap_or(""))?;
                let operand = parts.next().unwrap_or("");
                let value = {
                    let symbols = process.symbols();
                    match symbols.get(operand) {
                        Some(v) => *v,
                        None => operand
                            .parse::<i64>()
                            .map_err(|_| ExecError::BadOperand(operand.to_owned()))?
                            .clamp(0, u16::MAX as i64)
                            as u16,
                    }
                };
                ctx.memory.write(process, addr, value)?;
                process.add_paged_out(1);
                Ok(())
            },

            Opcode::Sleep => {
                let ms = params
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .parse::<u64>()
                    .map_err(|_| ExecError::BadOperand(params.to_owned()))?;
                thread::sleep(Duration::from_millis(ms));
                Ok(())
            },

            Opcode::For | Opcode::Unknown => Ok(()),
        }
    }
}

/// Parse a semicolon- or newline-separated program text.
/// Empty segments are skipped.
pub fn parse_program(text: &str) -> Result<Vec<Instruction>, ParseError> {
    text.split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(Instruction::parse)
        .collect()
}

/// Hexadecimal address with optional 0x prefix; must fit in 16 bits
fn parse_address(s: &str) -> Result<u16, ExecError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let raw = u32::from_str_radix(digits, 16)
        .map_err(|_| ExecError::InvalidAddress(s.to_owned()))?;
    if !MemoryManager::valid_address(raw) {
        return Err(ExecError::InvalidAddress(s.to_owned()));
    }
    Ok(raw as u16)
}

/// Replace each whole-word occurrence of a symbol name with its decimal
/// value. A word is a maximal run of alphanumeric characters.
fn substitute_symbols(text: &str, symbols: &HashMap<String, u16>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            word.push(ch);
        } else {
            flush_word(&mut out, &mut word, symbols);
            out.push(ch);
        }
    }
    flush_word(&mut out, &mut word, symbols);
    out
}

fn flush_word(out: &mut String, word: &mut String, symbols: &HashMap<String, u16>) {
    if word.is_empty() {
        return;
    }
    match symbols.get(word.as_str()) {
        Some(value) => out.push_str(&value.to_string()),
        None => out.push_str(word),
    }
    word.clear();
}
