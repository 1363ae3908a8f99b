//! End-to-end program scenarios, driven through the synchronous
//! execution path.

use std::sync::atomic::AtomicBool;

use csopesy::instruction::parse_program;
use csopesy::multitasking::ExecCtx;
use csopesy::{MemoryManager, Process, ProcessState, TickCounters};

struct Machine {
    memory: MemoryManager,
    ticks: TickCounters,
    cpu_running: AtomicBool,
}

impl Machine {
    fn new(max_frames: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            memory: MemoryManager::new(max_frames),
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

    fn run(&self, text: &str) -> Process {
        let program = parse_program(text).unwrap();
        let process = Process::new(1, "p01".to_owned(), program, 64).unwrap();
        process.run(0, 0, &self.ctx());
        process
    }
}

#[test]
fn test_declare_add_print() {
    let machine = Machine::new(8);
    let process = machine.run("DECLARE a 5; DECLARE b 7; ADD c a b; PRINT \"sum=c\"");

    assert_eq!(process.state(), ProcessState::Finished);
    assert_eq!(process.current_line(), 4);
    assert_eq!(process.symbol("c"), Some(12));
    assert!(process.logs().iter().any(|l| l == "PRINT: sum=12"));
}

#[test]
fn test_addition_saturates() {
    let machine = Machine::new(8);
    let process = machine.run("DECLARE a 65530; DECLARE b 10; ADD c a b; PRINT \"c\"");

    assert_eq!(process.symbol("c"), Some(65535));
    assert!(process.logs().iter().any(|l| l == "PRINT: 65535"));
}

#[test]
fn test_subtraction_saturates_to_zero() {
    let machine = Machine::new(8);
    let process = machine.run("DECLARE a 5; DECLARE b 10; SUB c a b; PRINT \"c\"");

    assert_eq!(process.symbol("c"), Some(0));
    assert!(process.logs().iter().any(|l| l == "PRINT: 0"));
}

#[test]
fn test_declare_clamps_value() {
    let machine = Machine::new(8);
    let process = machine.run("DECLARE a 70000; DECLARE b -5; PRINT \"a b\"");

    assert_eq!(process.symbol("a"), Some(65535));
    assert_eq!(process.symbol("b"), Some(0));
}

#[test]
fn test_write_read_roundtrip() {
    let machine = Machine::new(8);
    let process = machine.run("WRITE 0x100 42; READ v 0x100; PRINT \"v=v\"");

    assert_eq!(process.state(), ProcessState::Finished);
    assert_eq!(process.symbol("v"), Some(42));
    assert!(process.logs().iter().any(|l| l == "PRINT: v=42"));
    assert!(process.paged_in() >= 1);
    assert!(process.paged_out() >= 1);
}

#[test]
fn test_write_resolves_symbol_operand() {
    let machine = Machine::new(8);
    let process = machine.run("DECLARE a 9; WRITE 0x200 a; READ v 0x200; PRINT \"v\"");

    assert!(process.logs().iter().any(|l| l == "PRINT: 9"));
}

#[test]
fn test_eviction_preserves_values() {
    // Two physical frames force the first write out to the backing
    // store before it is read back
    let machine = Machine::new(2);
    let process = machine.run("WRITE 0x1 1; WRITE 0x2 2; WRITE 0x3 3; READ a 0x1; PRINT \"a\"");

    assert_eq!(process.state(), ProcessState::Finished);
    assert!(process.logs().iter().any(|l| l == "PRINT: 1"));
    assert!(machine.memory.used_frames() <= 2);
}

#[test]
fn test_invalid_address_finishes_process() {
    let machine = Machine::new(8);
    let process = machine.run("READ x 0x10000; PRINT \"never\"");

    assert_eq!(process.state(), ProcessState::Finished);
    // The PRINT after the failure never ran
    assert_eq!(process.current_line(), 1);
    let last = process.last_log().unwrap();
    assert!(last.starts_with("Error:"), "log was: {}", last);
    assert!(last.contains("Invalid memory address"));
    assert!(!process.logs().iter().any(|l| l.contains("never")));
}

#[test]
fn test_undefined_variable_finishes_process() {
    let machine = Machine::new(8);
    let process = machine.run("ADD c a b");

    assert_eq!(process.state(), ProcessState::Finished);
    let last = process.last_log().unwrap();
    assert!(last.starts_with("Error:"));
    assert!(last.contains("Undefined variable"));
}

#[test]
fn test_symbol_table_capacity() {
    let machine = Machine::new(8);
    let text = (0..33)
        .map(|i| format!("DECLARE v{} {}", i, i))
        .collect::<Vec<_>>()
        .join("; ");
    let process = machine.run(&text);

    assert_eq!(process.state(), ProcessState::Finished);
    assert_eq!(process.symbols().len(), 32);
    assert!(process
        .logs()
        .iter()
        .any(|l| l == "Symbol table full. DECLARE ignored."));
    // The overflowing DECLARE was a no-op, not an error
    assert!(!process.last_log().unwrap().starts_with("Error:"));
}

#[test]
fn test_sleep_passes_wall_time() {
    let machine = Machine::new(8);
    let started = std::time::Instant::now();
    let process = machine.run("SLEEP 30; PRINT \"done\"");

    assert_eq!(process.state(), ProcessState::Finished);
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));
}

#[test]
fn test_tick_accounting_is_consistent() {
    let machine = Machine::new(8);
    machine.run("DECLARE a 1; DECLARE b 2; ADD c a b");

    assert_eq!(machine.ticks.total(), machine.ticks.active() + machine.ticks.idle());
    // One interpreter tick per executed instruction
    assert_eq!(machine.ticks.active(), 3);
    assert_eq!(machine.ticks.idle(), 0);
}
