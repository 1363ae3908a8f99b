//! Textual reports: `process-smi`, `vmstat`, `screen -ls`, `report-util`.
//!
//! Rendering is separated from the REPL so the formats can be tested
//! without a terminal.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::multitasking::{Process, ProcessRegistry, ProcessState};
use crate::stats::TickCounters;

pub const VMSTAT_FILE: &str = "csopesy-vmstat.txt";
pub const REPORT_FILE: &str = "csopesy-log.txt";

const RULE_SMI: &str = "----------------------------------------------";
const RULE: &str = "--------------------------------";

fn mib_from_kib(kib: u64) -> f64 {
    kib as f64 / 1024.0
}

fn mib_from_bytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Share of processes currently on a core, percent.
/// This is the coarse utilization figure of the summary views; `vmstat`
/// reports the tick-based one.
fn running_share(processes: &[std::sync::Arc<Process>]) -> f64 {
    if processes.is_empty() {
        return 0.0;
    }
    let running = processes
        .iter()
        .filter(|p| p.state() == ProcessState::Running)
        .count();
    100.0 * running as f64 / processes.len() as f64
}

/// High-level memory / CPU / per-process summary
pub fn render_process_smi(registry: &ProcessRegistry, total_mem_bytes: u64) -> String {
    let processes = registry.processes();
    let used_kib: u64 = processes.iter().map(|p| p.memory_used() as u64).sum();
    let used_bytes = used_kib * 1024;
    let mem_util = if total_mem_bytes > 0 {
        100.0 * used_bytes as f64 / total_mem_bytes as f64
    } else {
        0.0
    };

    let mut out = String::new();
    out.push_str(RULE_SMI);
    out.push('\n');
    out.push_str("PROCESS-SMI V01.00 DRIVER VERSION: 01.00\n");
    out.push_str(&format!(
        "CPU Utilization: {:.2} %\n",
        running_share(&processes)
    ));
    out.push_str(&format!(
        "Memory Usage: {:.2} MiB / {:.2} MiB\n",
        mib_from_kib(used_kib),
        mib_from_bytes(total_mem_bytes)
    ));
    out.push_str(&format!("Memory Utilization: {:.2} %\n\n", mem_util));

    out.push_str("Running processes and memory usage:\n");
    for process in &processes {
        // Floor the display so tiny processes stay visible
        let mem_mib = mib_from_kib(process.memory_used() as u64).max(0.01);
        out.push_str(&format!(
            "{} {:.2} MiB | State: {}\n",
            process.name(),
            mem_mib,
            process.state()
        ));
    }
    out.push_str(RULE_SMI);
    out.push('\n');
    out
}

/// Fine-grained memory and tick statistics
pub fn render_vmstat(
    registry: &ProcessRegistry,
    ticks: &TickCounters,
    total_mem_bytes: u64,
) -> String {
    let processes = registry.processes();
    let used_kib: u64 = processes.iter().map(|p| p.memory_used() as u64).sum();
    let used_bytes = used_kib * 1024;
    let free_bytes = total_mem_bytes.saturating_sub(used_bytes);
    let paged_in: u64 = processes.iter().map(|p| p.paged_in()).sum();
    let paged_out: u64 = processes.iter().map(|p| p.paged_out()).sum();

    let mut out = String::new();
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Total memory: {} bytes\n", total_mem_bytes));
    out.push_str(&format!(
        "Used memory: {} bytes ({:.4} MiB)\n",
        used_bytes,
        mib_from_bytes(used_bytes)
    ));
    out.push_str(&format!(
        "Free memory: {} bytes ({:.4} MiB)\n",
        free_bytes,
        mib_from_bytes(free_bytes)
    ));
    out.push_str(&format!("Idle CPU ticks: {}\n", ticks.idle()));
    out.push_str(&format!("Active CPU ticks: {}\n", ticks.active()));
    out.push_str(&format!("Total CPU ticks: {}\n", ticks.total()));
    out.push_str(&format!(
        "CPU Utilization: {:.2} %\n",
        ticks.cpu_utilization()
    ));
    out.push_str(&format!("Num paged in: {}\n", paged_in));
    out.push_str(&format!("Num paged out: {}\n", paged_out));
    out.push_str(RULE);
    out.push('\n');
    out
}

pub fn write_vmstat(
    path: impl AsRef<Path>,
    registry: &ProcessRegistry,
    ticks: &TickCounters,
    total_mem_bytes: u64,
) -> io::Result<()> {
    fs::write(path, render_vmstat(registry, ticks, total_mem_bytes))
}

/// The `screen -ls` listing: running processes with their core and
/// progress, then the finished ones
pub fn render_screen_ls(registry: &ProcessRegistry) -> String {
    let processes = registry.processes();

    let mut out = String::new();
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "CPU Utilization: {:.2} %\n",
        running_share(&processes)
    ));

    out.push_str("\nRunning processes:\n");
    for process in &processes {
        if process.state() == ProcessState::Running {
            let core = match process.current_core() {
                Some(core) => core.to_string(),
                None => "Unassigned".to_owned(),
            };
            out.push_str(&format!(
                "{} | State: RUNNING | Core: {} | Line: {}/{}\n",
                process.name(),
                core,
                process.current_line(),
                process.line_count()
            ));
        }
    }

    out.push_str("\nFinished processes:\n");
    for process in &processes {
        if process.state() == ProcessState::Finished {
            out.push_str(&format!(
                "{} | State: FINISHED | Total lines: {}/{}\n",
                process.name(),
                process.line_count(),
                process.line_count()
            ));
        }
    }

    out.push_str(RULE);
    out.push('\n');
    out
}

/// Utilization report appended to the log file by `report-util`
pub fn render_report_util(
    registry: &ProcessRegistry,
    num_cpus: usize,
    used_frames: usize,
    frame_capacity: usize,
) -> String {
    let mut out = String::new();
    out.push_str("=== Utilization Report ===\n");
    out.push_str(&format!("Total CPU cores: {}\n", num_cpus));
    out.push_str(&format!(
        "Memory usage: {} / {} frames\n",
        used_frames, frame_capacity
    ));
    out.push_str("Processes summary:\n");
    for process in registry.processes() {
        let core = match process.current_core() {
            Some(core) => core.to_string(),
            None => "Unassigned".to_owned(),
        };
        out.push_str(&format!(
            "Process: {}, PID: {}, State: {}, Current line: {}/{}, Core: {}\n",
            process.name(),
            process.pid(),
            process.state(),
            process.current_line(),
            process.line_count(),
            core
        ));
    }
    out.push_str("=== End of Report ===\n\n");
    out
}

pub fn append_report(path: impl AsRef<Path>, report: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(report.as_bytes())
}

/// The per-process `process-smi` of a screen console
pub fn render_process_console_smi(process: &Process) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nProcess name: {}\n", process.name()));
    out.push_str(&format!("PID: {}\n", process.pid()));
    out.push_str("Logs:\n");
    for line in process.logs() {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!(
        "Current instruction line: {}\n",
        process.current_line()
    ));
    out.push_str(&format!("Lines of code: {}\n", process.line_count()));
    out.push_str(&format!(
        "Memory: {} KiB used (peak {} KiB) of {} KiB\n",
        process.memory_used(),
        process.peak_memory_used(),
        process.memory_size()
    ));
    if process.state() == ProcessState::Finished {
        out.push_str("\nFinished!\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multitasking::{ProcessRegistry, ProcessState};

    fn registry_with_work() -> ProcessRegistry {
        let registry = ProcessRegistry::new();
        let a = registry
            .create_process("a", 64, "DECLARE x 1; PRINT \"x\"")
            .unwrap();
        let b = registry
            .create_process("b", 64, "DECLARE y 2; PRINT \"y\"")
            .unwrap();
        a.allocate_memory(2);
        a.set_state(ProcessState::Running);
        a.set_current_core(Some(0));
        b.set_state(ProcessState::Finished);
        b.add_paged_in(3);
        b.add_paged_out(1);
        registry
    }

    #[test]
    fn test_process_smi_lists_processes() {
        let registry = registry_with_work();
        let out = render_process_smi(&registry, 65536);

        assert!(out.contains("PROCESS-SMI V01.00"));
        assert!(out.contains("CPU Utilization: 50.00 %"));
        assert!(out.contains("a 0.01 MiB | State: RUNNING"));
        assert!(out.contains("b 0.01 MiB | State: FINISHED"));
    }

    #[test]
    fn test_vmstat_fields() {
        let registry = registry_with_work();
        let ticks = TickCounters::new();
        ticks.add_active(6);
        ticks.add_idle(2);

        let out = render_vmstat(&registry, &ticks, 65536);
        assert!(out.contains("Total memory: 65536 bytes"));
        assert!(out.contains("Used memory: 2048 bytes"));
        assert!(out.contains("Free memory: 63488 bytes"));
        assert!(out.contains("Idle CPU ticks: 2"));
        assert!(out.contains("Active CPU ticks: 6"));
        assert!(out.contains("Total CPU ticks: 8"));
        assert!(out.contains("CPU Utilization: 75.00 %"));
        assert!(out.contains("Num paged in: 3"));
        assert!(out.contains("Num paged out: 1"));
    }

    #[test]
    fn test_screen_ls_sections() {
        let registry = registry_with_work();
        let out = render_screen_ls(&registry);

        assert!(out.contains("Running processes:"));
        assert!(out.contains("a | State: RUNNING | Core: 0 | Line: 0/2"));
        assert!(out.contains("Finished processes:"));
        assert!(out.contains("b | State: FINISHED | Total lines: 2/2"));
    }

    #[test]
    fn test_report_util_summary() {
        let registry = registry_with_work();
        let out = render_report_util(&registry, 4, 3, 256);

        assert!(out.starts_with("=== Utilization Report ==="));
        assert!(out.contains("Total CPU cores: 4"));
        assert!(out.contains("Memory usage: 3 / 256 frames"));
        assert!(out.contains("Process: a, PID: 1, State: RUNNING, Current line: 0/2, Core: 0"));
        assert!(out.contains("Process: b, PID: 2, State: FINISHED"));
        assert!(out.trim_end().ends_with("=== End of Report ==="));
    }

    #[test]
    fn test_console_smi_shows_logs() {
        let registry = registry_with_work();
        let process = registry.find("b").unwrap();
        let out = render_process_console_smi(&process);

        assert!(out.contains("Process name: b"));
        assert!(out.contains("PID: 2"));
        assert!(out.contains("Process created with memory 64 KiB."));
        assert!(out.contains("Memory: 0 KiB used (peak 0 KiB) of 64 KiB"));
        assert!(out.contains("Finished!"));
    }
}
