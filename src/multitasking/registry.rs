//! Name-indexed collection of live processes.
//!
//! Append-only: processes are never removed, finished ones stay visible
//! to the reporting commands. The registry is shared by handle between
//! the shell and the scheduler and owns PID assignment.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use spin::Mutex;

use super::process::{Process, ProcessError, MAX_PROGRAM_LEN, MIN_PROGRAM_LEN};
use crate::instruction::{parse_program, ParseError};

#[derive(Debug)]
pub enum RegistryError {
    DuplicateName(String),
    Parse(ParseError),
    Process(ProcessError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::DuplicateName(name) => {
                write!(f, "Process with name '{}' already exists.", name)
            },
            RegistryError::Parse(e) => write!(f, "{}", e),
            RegistryError::Process(e) => write!(f, "{}", e),
        }
    }
}

impl From<ParseError> for RegistryError {
    fn from(e: ParseError) -> Self {
        RegistryError::Parse(e)
    }
}

impl From<ProcessError> for RegistryError {
    fn from(e: ProcessError) -> Self {
        RegistryError::Process(e)
    }
}

pub struct ProcessRegistry {
    processes: Mutex<Vec<Arc<Process>>>,
    next_pid: AtomicU32,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1),
        }
    }

    /// Take the next free PID. Monotone; consumed even if the creation
    /// that requested it later fails.
    pub fn next_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an already-built process. Rejects duplicate names.
    pub fn add(&self, process: Process) -> Result<Arc<Process>, RegistryError> {
        let mut processes = self.processes.lock();
        if processes.iter().any(|p| p.name() == process.name()) {
            return Err(RegistryError::DuplicateName(process.name().to_owned()));
        }
        let process = Arc::new(process);
        processes.push(Arc::clone(&process));
        Ok(process)
    }

    /// Parse and register a user-supplied program. The process is stored
    /// READY; whoever drives it (a scheduler worker, or the shell for
    /// synchronous runs) claims it first.
    pub fn create_process(
        &self,
        name: &str,
        memory_size: u32,
        instructions_text: &str,
    ) -> Result<Arc<Process>, RegistryError> {
        if self.find(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_owned()));
        }

        let instructions = parse_program(instructions_text)?;
        if !(MIN_PROGRAM_LEN..=MAX_PROGRAM_LEN).contains(&instructions.len()) {
            return Err(RegistryError::Process(ProcessError::ProgramLength {
                name: name.to_owned(),
                len: instructions.len(),
            }));
        }

        let process = Process::new(self.next_pid(), name.to_owned(), instructions, memory_size)?;
        self.add(process)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Process>> {
        self.processes
            .lock()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn find_by_pid(&self, pid: u32) -> Option<Arc<Process>> {
        self.processes
            .lock()
            .iter()
            .find(|p| p.pid() == pid)
            .cloned()
    }

    /// Snapshot of all processes in registration order
    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.processes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
