pub mod process;
pub mod registry;
pub mod scheduler;

pub use self::process::{Process, ProcessError, ProcessState};
pub use self::registry::{ProcessRegistry, RegistryError};
pub use self::scheduler::{Scheduler, SchedulerConfig};

use std::sync::atomic::AtomicBool;

use crate::memory::MemoryManager;
use crate::stats::TickCounters;

/// Shared services an executing instruction may reach into.
///
/// Passed explicitly down the execution path instead of living in
/// globals, so the shell, the scheduler workers, and tests can each run
/// against their own set of services.
pub struct ExecCtx<'a> {
    pub memory: &'a MemoryManager,
    pub ticks: &'a TickCounters,
    /// Preemption signal: once cleared, a process finishes at its next
    /// instruction boundary
    pub cpu_running: &'a AtomicBool,
}
