//! Scheduling behavior: selection order, round-robin fairness, and the
//! threaded worker pool.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use csopesy::config::Algorithm;
use csopesy::multitasking::scheduler::{next_process_fcfs, next_process_rr, run_slice};
use csopesy::multitasking::{ExecCtx, ProcessRegistry, Scheduler, SchedulerConfig};
use csopesy::{MemoryManager, ProcessState, TickCounters};

struct Machine {
    memory: MemoryManager,
    ticks: TickCounters,
    cpu_running: AtomicBool,
}

impl Machine {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            memory: MemoryManager::new(16),
            ticks: TickCounters::new(),
            cpu_running: AtomicBool::new(true),
        }
    }

    fn ctx(&self) -> ExecCtx<'_> {
        ExecCtx {
            memory: &self.memory,
            ticks: &self.ticks,
            cpu_running: &self.cpu_running,
        }
    }
}

fn add_program(registry: &ProcessRegistry, name: &str, lines: usize) {
    let text = vec!["PRINT \"tick\""; lines].join("; ");
    registry.create_process(name, 64, &text).unwrap();
}

#[test]
fn test_fcfs_completes_in_registration_order() {
    let machine = Machine::new();
    let registry = ProcessRegistry::new();
    add_program(&registry, "first", 4);
    add_program(&registry, "second", 4);
    add_program(&registry, "third", 4);
    let ctx = machine.ctx();

    // One simulated core: each selected process runs to completion
    let mut finish_order = Vec::new();
    while let Some(process) = next_process_fcfs(&registry) {
        run_slice(&process, 0, None, 0, &ctx);
        assert_eq!(process.state(), ProcessState::Finished);
        finish_order.push(process.name().to_owned());
    }

    assert_eq!(finish_order, ["first", "second", "third"]);
}

#[test]
fn test_round_robin_alternates_on_quantum() {
    let machine = Machine::new();
    let registry = ProcessRegistry::new();
    add_program(&registry, "a", 9);
    add_program(&registry, "b", 9);
    let cursor = AtomicUsize::new(0);
    let ctx = machine.ctx();

    // Quantum 3 on one core: no process runs more than three
    // consecutive instructions while the other is READY
    let mut slices = Vec::new();
    while let Some(process) = next_process_rr(&registry, &cursor) {
        let before = process.current_line();
        run_slice(&process, 0, Some(3), 0, &ctx);
        slices.push((process.name().to_owned(), process.current_line() - before));
    }

    let names: Vec<&str> = slices.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["a", "b", "a", "b", "a", "b"]);
    assert!(slices.iter().all(|(_, executed)| *executed == 3));
}

#[test]
fn test_round_robin_skips_finished_processes() {
    let machine = Machine::new();
    let registry = ProcessRegistry::new();
    add_program(&registry, "short", 2);
    add_program(&registry, "long", 8);
    let cursor = AtomicUsize::new(0);
    let ctx = machine.ctx();

    let mut slices = Vec::new();
    while let Some(process) = next_process_rr(&registry, &cursor) {
        run_slice(&process, 0, Some(3), 0, &ctx);
        slices.push(process.name().to_owned());
    }

    // "short" finishes inside its first quantum and never comes back
    assert_eq!(slices, ["short", "long", "long", "long"]);
}

#[test]
fn test_worker_pool_drains_registry() {
    let registry = Arc::new(ProcessRegistry::new());
    let memory = Arc::new(MemoryManager::new(16));
    let ticks = Arc::new(TickCounters::new());

    for i in 0..4 {
        let name = format!("job{}", i);
        registry
            .create_process(
                &name,
                64,
                "DECLARE a 2; DECLARE b 3; ADD c a b; WRITE 0x500 c; READ d 0x500; PRINT \"d\"",
            )
            .unwrap();
    }
    let preloaded: Vec<_> = registry.processes();

    let config = SchedulerConfig {
        num_cpus: 2,
        algorithm: Algorithm::RoundRobin,
        quantum_cycles: 2,
        batch_process_freq: 60_000, // generate once, then sit idle
        min_ins: 3,
        max_ins: 5,
        delay_per_exec: 0,
    };
    let mut scheduler = Scheduler::new(
        config,
        Arc::clone(&registry),
        Arc::clone(&memory),
        Arc::clone(&ticks),
    );
    scheduler.start();

    for _ in 0..500 {
        if preloaded
            .iter()
            .all(|p| p.state() == ProcessState::Finished)
        {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    scheduler.stop();

    for process in &preloaded {
        assert_eq!(process.state(), ProcessState::Finished);
        assert_eq!(process.symbol("d"), Some(5), "process {}", process.name());
        assert!(!process.last_log().unwrap().starts_with("Error:"));
    }
    assert!(memory.used_frames() <= memory.capacity());
    assert_eq!(ticks.total(), ticks.active() + ticks.idle());
    assert!(ticks.active() > 0);
}
