//! Core workers, ready-queue selection, and the background process
//! generator.
//!
//! One OS thread per logical core pulls READY processes and drives them:
//! to completion under FCFS, for at most one quantum under round-robin.
//! Selection claims a process with an atomic READY -> RUNNING exchange,
//! so a process is never driven by two workers at once. A separate
//! generator thread feeds the registry with random programs until
//! stopped.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::process::{Process, ProcessState};
use super::registry::ProcessRegistry;
use super::ExecCtx;
use crate::config::{Algorithm, Config};
use crate::instruction::{Instruction, Opcode};
use crate::memory::MemoryManager;
use crate::stats::TickCounters;

/// Worker sleep when no READY process exists; counts one idle tick
const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Generation interval used by `test`
const TEST_BATCH_FREQ_MS: u64 = 100;
/// Per-instruction delay used by `test`
const TEST_DELAY_PER_EXEC_MS: u64 = 300;

/// Memory size of generated processes, KiB
const GENERATED_MEMORY_KB: u32 = 64;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_cpus: usize,
    pub algorithm: Algorithm,
    /// Max consecutive instructions per slice, round-robin only
    pub quantum_cycles: u32,
    /// Process generation interval, milliseconds
    pub batch_process_freq: u64,
    pub min_ins: u32,
    pub max_ins: u32,
    /// Sleep between executed instructions, milliseconds
    pub delay_per_exec: u64,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            num_cpus: config.num_cpu.max(1),
            algorithm: config.scheduler,
            quantum_cycles: config.quantum_cycles,
            batch_process_freq: config.batch_process_freq,
            min_ins: config.min_ins,
            max_ins: config.max_ins,
            delay_per_exec: config.delay_per_exec,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<ProcessRegistry>,
    memory: Arc<MemoryManager>,
    ticks: Arc<TickCounters>,

    cpu_running: Arc<AtomicBool>,
    generator_running: Arc<AtomicBool>,
    /// Rolling round-robin scan position, shared by all workers
    rr_cursor: Arc<AtomicUsize>,
    /// Numbers the generated process names (p01, p02, ...)
    name_counter: Arc<AtomicU32>,
    /// Wakes the generator out of its bounded wait on stop
    generator_wakeup: Arc<(StdMutex<()>, Condvar)>,

    workers: Vec<JoinHandle<()>>,
    generator: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ProcessRegistry>,
        memory: Arc<MemoryManager>,
        ticks: Arc<TickCounters>,
    ) -> Self {
        Self {
            config,
            registry,
            memory,
            ticks,
            cpu_running: Arc::new(AtomicBool::new(false)),
            generator_running: Arc::new(AtomicBool::new(false)),
            rr_cursor: Arc::new(AtomicUsize::new(0)),
            name_counter: Arc::new(AtomicU32::new(1)),
            generator_wakeup: Arc::new((StdMutex::new(()), Condvar::new())),
            workers: Vec::new(),
            generator: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.cpu_running.load(Ordering::Acquire)
    }

    pub fn is_generator_running(&self) -> bool {
        self.generator_running.load(Ordering::Acquire)
    }

    /// Apply a new configuration. Refused while the workers run.
    pub fn set_config(&mut self, config: SchedulerConfig) -> bool {
        if self.is_running() {
            return false;
        }
        self.config = config;
        true
    }

    /// Launch the core workers and the generator. Idempotent.
    pub fn start(&mut self) {
        if !self.cpu_running.swap(true, Ordering::AcqRel) {
            self.memory.set_fault_logging(true);
            for core_id in 0..self.config.num_cpus {
                let worker = self.spawn_worker(core_id);
                self.workers.push(worker);
            }
            log::info!(
                "Started {} core workers ({})",
                self.config.num_cpus,
                self.config.algorithm
            );
        }
        if !self.generator_running.swap(true, Ordering::AcqRel) {
            self.generator = Some(self.spawn_generator());
            log::info!("Process generator started");
        }
    }

    /// `start` with a short generation interval and a visible
    /// per-instruction delay
    pub fn test(&mut self) {
        if !self.is_running() {
            self.config.batch_process_freq = TEST_BATCH_FREQ_MS;
            self.config.delay_per_exec = TEST_DELAY_PER_EXEC_MS;
        }
        self.start();
    }

    /// Halt only the generator; workers keep draining the ready queue
    pub fn stop_generator(&mut self) {
        self.generator_running.store(false, Ordering::Release);
        self.generator_wakeup.1.notify_all();
        if let Some(generator) = self.generator.take() {
            let _ = generator.join();
        }
        // Silence page-fault chatter while the workers drain
        self.memory.set_fault_logging(false);
        log::info!("Process generator stopped");
    }

    /// Halt generator and workers and join them all
    pub fn stop(&mut self) {
        self.generator_running.store(false, Ordering::Release);
        self.cpu_running.store(false, Ordering::Release);
        self.generator_wakeup.1.notify_all();

        if let Some(generator) = self.generator.take() {
            let _ = generator.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::info!("Scheduler fully stopped");
    }

    fn spawn_worker(&self, core_id: usize) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let memory = Arc::clone(&self.memory);
        let ticks = Arc::clone(&self.ticks);
        let cpu_running = Arc::clone(&self.cpu_running);
        let rr_cursor = Arc::clone(&self.rr_cursor);
        let algorithm = self.config.algorithm;
        let quantum = match algorithm {
            Algorithm::RoundRobin => Some(self.config.quantum_cycles.max(1)),
            Algorithm::Fcfs => None,
        };
        let delay = self.config.delay_per_exec;

        thread::Builder::new()
            .name(format!("core-{}", core_id))
            .spawn(move || {
                let ctx = ExecCtx {
                    memory: &memory,
                    ticks: &ticks,
                    cpu_running: &cpu_running,
                };
                while cpu_running.load(Ordering::Acquire) {
                    let selected = match algorithm {
                        Algorithm::RoundRobin => next_process_rr(&registry, &rr_cursor),
                        Algorithm::Fcfs => next_process_fcfs(&registry),
                    };
                    match selected {
                        Some(process) => {
                            run_slice(&process, core_id, quantum, delay, &ctx);
                            if process.state() == ProcessState::Finished {
                                log::debug!(
                                    "[Core {}] {} finished execution",
                                    core_id,
                                    process.name()
                                );
                            } else {
                                log::debug!(
                                    "[Core {}] {} set back to READY",
                                    core_id,
                                    process.name()
                                );
                            }
                        },
                        None => {
                            ticks.add_idle(1);
                            thread::sleep(IDLE_SLEEP);
                        },
                    }
                }
            })
            .expect("Unable to spawn core worker")
    }

    fn spawn_generator(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let generator_running = Arc::clone(&self.generator_running);
        let wakeup = Arc::clone(&self.generator_wakeup);
        let name_counter = Arc::clone(&self.name_counter);
        let min_ins = self.config.min_ins;
        let max_ins = self.config.max_ins;
        let batch_freq = self.config.batch_process_freq;

        thread::Builder::new()
            .name("generator".to_owned())
            .spawn(move || {
                let mut rng = SmallRng::from_entropy();
                while generator_running.load(Ordering::Acquire) {
                    generate_process(&registry, &mut rng, &name_counter, min_ins, max_ins);

                    // Bounded wait, cut short by stop()
                    let (lock, condvar) = &*wakeup;
                    let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    let _ = condvar.wait_timeout_while(
                        guard,
                        Duration::from_millis(batch_freq),
                        |_| generator_running.load(Ordering::Acquire),
                    );
                }
            })
            .expect("Unable to spawn process generator")
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// FCFS selection: claim the first READY process in registration order
pub fn next_process_fcfs(registry: &ProcessRegistry) -> Option<Arc<Process>> {
    registry.processes().into_iter().find(|p| p.try_claim())
}

/// Round-robin selection: claim the first READY process scanning from
/// the rolling cursor, then advance the cursor past it
pub fn next_process_rr(registry: &ProcessRegistry, cursor: &AtomicUsize) -> Option<Arc<Process>> {
    let processes = registry.processes();
    let len = processes.len();
    if len == 0 {
        return None;
    }
    let start = cursor.load(Ordering::Relaxed);
    for offset in 0..len {
        let index = (start + offset) % len;
        if processes[index].try_claim() {
            cursor.store((index + 1) % len, Ordering::Relaxed);
            return Some(Arc::clone(&processes[index]));
        }
    }
    None
}

/// Drive one scheduling slice of a claimed (RUNNING) process: at most
/// `quantum` instructions when given, until completion or scheduler stop
/// otherwise. A process that did not finish goes back to READY.
pub fn run_slice(
    process: &Process,
    core_id: usize,
    quantum: Option<u32>,
    delay_ms: u64,
    ctx: &ExecCtx<'_>,
) {
    process.set_current_core(Some(core_id));

    let mut executed = 0u32;
    while process.state() == ProcessState::Running && ctx.cpu_running.load(Ordering::Acquire) {
        process.execute_next_instruction(core_id, ctx);
        ctx.ticks.add_active(1);
        executed += 1;
        log::trace!(
            "[Core {}] {} executing instruction {}/{}",
            core_id,
            process.name(),
            process.current_line(),
            process.line_count()
        );

        if let Some(quantum) = quantum {
            if executed >= quantum {
                break;
            }
        }
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
    }

    if process.state() != ProcessState::Finished {
        process.set_state(ProcessState::Ready);
    }
}

/// Synthesize one random program and register it under an auto-numbered
/// name. The shape: a few DECLAREs, a few ADD/SUB pairs over them, a few
/// WRITE/READ round-trips, then a PRINT per variable.
fn generate_process(
    registry: &ProcessRegistry,
    rng: &mut SmallRng,
    name_counter: &AtomicU32,
    min_ins: u32,
    max_ins: u32,
) {
    let hi = max_ins.max(min_ins);
    let count = rng.gen_range(min_ins..=hi).max(3) as usize;

    let mut instructions = Vec::new();
    let mut vars: Vec<String> = Vec::new();

    for i in 0..count / 3 {
        let var = format!("x{}", i);
        instructions.push(Instruction::new(Opcode::Declare, format!("{} 0", var)));
        vars.push(var);
    }

    for _ in 0..count / 3 {
        if vars.len() >= 2 {
            let operands = format!("{} {} {}", vars[0], vars[0], vars[1]);
            instructions.push(Instruction::new(Opcode::Add, operands.clone()));
            instructions.push(Instruction::new(Opcode::Sub, operands));
        } else {
            let operands = format!("{} {} {}", vars[0], vars[0], vars[0]);
            instructions.push(Instruction::new(Opcode::Add, operands));
        }
    }

    for i in 0..count / 6 {
        let var = vars[i % vars.len()].clone();
        let addr = format!("{:#x}", 0x500 + i * 2);
        instructions.push(Instruction::new(Opcode::Write, format!("{} {}", addr, var)));
        let read_var = format!("r{}", i);
        instructions.push(Instruction::new(Opcode::Read, format!("{} {}", read_var, addr)));
        vars.push(read_var);
    }

    for var in &vars {
        instructions.push(Instruction::new(Opcode::Print, var.clone()));
    }

    let name = format!("p{:02}", name_counter.fetch_add(1, Ordering::Relaxed));
    let pid = registry.next_pid();
    let len = instructions.len();

    match Process::new(pid, name.clone(), instructions, GENERATED_MEMORY_KB) {
        Ok(process) => match registry.add(process) {
            Ok(_) => log::info!("Generated process: {} with {} instructions", name, len),
            Err(e) => log::warn!("Skipping generated process: {}", e),
        },
        Err(e) => log::warn!("Skipping generated process: {}", e),
    }
}
