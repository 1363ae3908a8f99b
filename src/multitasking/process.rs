//! Process descriptors.
//!
//! A process is passive state: the program, the execution cursor, the
//! symbol table, logs, and counters. It is advanced exclusively through
//! `execute_next_instruction`, called by whoever currently owns the
//! process (a scheduler worker, or the shell for synchronous runs).
//! Scalar state is atomic and the two composite fields take leaf locks,
//! so reporting commands can read a process while it executes.

use std::fmt;
use std::sync::atomic::{
    AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use spin::Mutex;

use super::ExecCtx;
use crate::instruction::{Instruction, Opcode};

/// Symbol table capacity per process
pub const MAX_SYMBOLS: usize = 32;

/// User-supplied program length bounds, inclusive
pub const MIN_PROGRAM_LEN: usize = 1;
pub const MAX_PROGRAM_LEN: usize = 50;

const STATE_READY: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_FINISHED: u8 = 2;

const CORE_UNASSIGNED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    /// Terminal
    Finished,
}

impl ProcessState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_READY => ProcessState::Ready,
            STATE_RUNNING => ProcessState::Running,
            _ => ProcessState::Finished,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProcessState::Ready => STATE_READY,
            ProcessState::Running => STATE_RUNNING,
            ProcessState::Finished => STATE_FINISHED,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessState::Ready => write!(f, "READY"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Finished => write!(f, "FINISHED"),
        }
    }
}

#[derive(Debug)]
pub enum ProcessError {
    InvalidMemorySize { name: String, size: u32 },
    ProgramLength { name: String, len: usize },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::InvalidMemorySize { name, size } => write!(
                f,
                "Invalid memory allocation of {} KiB for process '{}'. \
                 Must be a power of 2 between 64 and 216 KiB.",
                size, name
            ),
            ProcessError::ProgramLength { name, len } => write!(
                f,
                "Instruction count must be between {} and {} for process '{}', got {}.",
                MIN_PROGRAM_LEN, MAX_PROGRAM_LEN, name, len
            ),
        }
    }
}

/// Valid per-process memory sizes are powers of two in [64, 216] KiB
pub fn valid_memory_size(size: u32) -> bool {
    size.is_power_of_two() && (64..=216).contains(&size)
}

pub struct Process {
    pid: u32,
    name: String,
    instructions: Vec<Instruction>,
    /// Declared memory bound, KiB
    memory_size: u32,
    /// FOR-weighted program length
    total_lines: u32,

    state: AtomicU8,
    /// Index of the next instruction to execute
    cursor: AtomicUsize,
    /// KiB, clamped at `memory_size`
    memory_used: AtomicU32,
    peak_memory_used: AtomicU32,
    paged_in: AtomicU64,
    paged_out: AtomicU64,
    current_core: AtomicI64,
    screened: AtomicBool,

    symbols: Mutex<HashMap<String, u16>>,
    logs: Mutex<Vec<String>>,
}

impl Process {
    pub fn new(
        pid: u32,
        name: String,
        instructions: Vec<Instruction>,
        memory_size: u32,
    ) -> Result<Self, ProcessError> {
        if !valid_memory_size(memory_size) {
            return Err(ProcessError::InvalidMemorySize {
                name,
                size: memory_size,
            });
        }

        let total_lines = instructions.iter().map(Instruction::line_weight).sum();
        let created = format!(
            "{} Process created with memory {} KiB.",
            timestamp(),
            memory_size
        );

        Ok(Self {
            pid,
            name,
            instructions,
            memory_size,
            total_lines,
            state: AtomicU8::new(STATE_READY),
            cursor: AtomicUsize::new(0),
            memory_used: AtomicU32::new(0),
            peak_memory_used: AtomicU32::new(0),
            paged_in: AtomicU64::new(0),
            paged_out: AtomicU64::new(0),
            current_core: AtomicI64::new(CORE_UNASSIGNED),
            screened: AtomicBool::new(false),
            symbols: Mutex::new(HashMap::new()),
            logs: Mutex::new(vec![created]),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// READY -> RUNNING, atomically with the selection that follows.
    /// Returns false if the process was not READY.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_READY,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Index of the next instruction to execute
    pub fn current_line(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn line_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn total_lines(&self) -> u32 {
        self.total_lines
    }

    pub fn memory_size(&self) -> u32 {
        self.memory_size
    }

    pub fn memory_used(&self) -> u32 {
        self.memory_used.load(Ordering::Relaxed)
    }

    pub fn peak_memory_used(&self) -> u32 {
        self.peak_memory_used.load(Ordering::Relaxed)
    }

    /// Account `kb` KiB of use, clamped at the declared memory size
    pub fn allocate_memory(&self, kb: u32) {
        let used = self
            .memory_used
            .load(Ordering::Relaxed)
            .saturating_add(kb)
            .min(self.memory_size);
        self.memory_used.store(used, Ordering::Relaxed);
        self.peak_memory_used.fetch_max(used, Ordering::Relaxed);
    }

    pub fn paged_in(&self) -> u64 {
        self.paged_in.load(Ordering::Relaxed)
    }

    pub fn paged_out(&self) -> u64 {
        self.paged_out.load(Ordering::Relaxed)
    }

    pub fn add_paged_in(&self, n: u64) {
        self.paged_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_paged_out(&self, n: u64) {
        self.paged_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn current_core(&self) -> Option<usize> {
        match self.current_core.load(Ordering::Relaxed) {
            CORE_UNASSIGNED => None,
            core => Some(core as usize),
        }
    }

    pub fn set_current_core(&self, core: Option<usize>) {
        let value = core.map(|c| c as i64).unwrap_or(CORE_UNASSIGNED);
        self.current_core.store(value, Ordering::Relaxed);
    }

    pub fn is_screened(&self) -> bool {
        self.screened.load(Ordering::Relaxed)
    }

    pub fn mark_screened(&self) {
        self.screened.store(true, Ordering::Relaxed);
    }

    pub fn symbols(&self) -> spin::MutexGuard<'_, HashMap<String, u16>> {
        self.symbols.lock()
    }

    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols.lock().get(name).copied()
    }

    pub fn push_log(&self, line: String) {
        self.logs.lock().push(line);
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub fn last_log(&self) -> Option<String> {
        self.logs.lock().last().cloned()
    }

    /// Advance the process by one instruction on behalf of core `core_id`.
    ///
    /// Checks the global stop flag and the cursor, logs the dispatch,
    /// accounts memory for DECLARE/WRITE, interprets the instruction, and
    /// moves the cursor. Instruction errors are absorbed here: they are
    /// logged and finish the process.
    pub fn execute_next_instruction(&self, core_id: usize, ctx: &ExecCtx<'_>) {
        if !ctx.cpu_running.load(Ordering::Acquire) {
            self.push_log(format!(
                "{} Execution stopped due to scheduler stop.",
                timestamp()
            ));
            self.set_state(ProcessState::Finished);
            return;
        }

        let cursor = self.cursor.load(Ordering::Acquire);
        let instruction = match self.instructions.get(cursor) {
            Some(instruction) => instruction,
            None => {
                self.set_state(ProcessState::Finished);
                return;
            },
        };

        self.push_log(format!(
            "{} Core [{}] \"{}\" from {}",
            timestamp(),
            core_id,
            instruction.params,
            self.name
        ));

        if matches!(instruction.opcode, Opcode::Write | Opcode::Declare) {
            self.allocate_memory(1);
        }

        let result = instruction.execute(self, ctx);

        // The cursor advances even when the instruction failed
        let next = self.cursor.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(()) => {
                if next >= self.instructions.len() {
                    self.set_state(ProcessState::Finished);
                }
            },
            Err(e) => {
                self.push_log(format!("Error: {} at: {}", e, instruction.params));
                self.set_state(ProcessState::Finished);
            },
        }
    }

    /// Convenience loop: run until finished or the stop flag clears,
    /// sleeping `delay_ms` between instructions
    pub fn run(&self, core_id: usize, delay_ms: u64, ctx: &ExecCtx<'_>) {
        self.set_state(ProcessState::Running);
        while self.state() == ProcessState::Running && ctx.cpu_running.load(Ordering::Acquire) {
            self.execute_next_instruction(core_id, ctx);
            if delay_ms > 0 {
                thread::sleep(Duration::from_millis(delay_ms));
            }
        }
        if !ctx.cpu_running.load(Ordering::Acquire) {
            self.push_log(format!(
                "{} Execution halted due to scheduler stop.",
                timestamp()
            ));
        }
        self.set_state(ProcessState::Finished);
    }
}

fn timestamp() -> String {
    format!("[{}]", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
}
