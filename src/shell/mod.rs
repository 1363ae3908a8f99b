//! The interactive command shell.
//!
//! Owns the registry, the memory manager, the tick counters, and the
//! scheduler, and wires the line-oriented commands to them. Input comes
//! through any `BufRead`, so the whole command surface is scriptable
//! from tests.

pub mod reports;

use std::io::{self, BufRead, Lines, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{Config, ConfigError, CONFIG_FILE};
use crate::memory::{MemoryManager, BACKING_STORE_FILE};
use crate::multitasking::process::valid_memory_size;
use crate::multitasking::{
    ExecCtx, Process, ProcessRegistry, ProcessState, Scheduler, SchedulerConfig,
};
use crate::stats::TickCounters;

use self::reports::{
    append_report, render_process_console_smi, render_process_smi, render_report_util,
    render_screen_ls, write_vmstat, REPORT_FILE, VMSTAT_FILE,
};

pub struct Shell {
    config: Config,
    registry: Arc<ProcessRegistry>,
    memory: Arc<MemoryManager>,
    ticks: Arc<TickCounters>,
    scheduler: Scheduler,
    /// Stop flag for shell-driven synchronous runs; never cleared, the
    /// scheduler's own flag governs the workers
    shell_running: AtomicBool,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let memory = Arc::new(MemoryManager::new(config.max_frames()));
        let ticks = Arc::new(TickCounters::new());
        let scheduler = Scheduler::new(
            SchedulerConfig::from(&config),
            Arc::clone(&registry),
            Arc::clone(&memory),
            Arc::clone(&ticks),
        );
        Self {
            config,
            registry,
            memory,
            ticks,
            scheduler,
            shell_running: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    fn exec_ctx(&self) -> ExecCtx<'_> {
        ExecCtx {
            memory: &self.memory,
            ticks: &self.ticks,
            cpu_running: &self.shell_running,
        }
    }

    /// Run the REPL over stdin until `exit` or end of input
    pub fn run(&mut self) -> io::Result<()> {
        self.run_with(io::stdin().lock())
    }

    pub fn run_with(&mut self, input: impl BufRead) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            print!("Enter command: ");
            io::stdout().flush()?;
            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            if !self.dispatch(line.trim(), &mut lines)? {
                break;
            }
        }
        self.scheduler.stop();
        Ok(())
    }

    /// Returns false when the shell should terminate
    fn dispatch<I: BufRead>(&mut self, line: &str, lines: &mut Lines<I>) -> io::Result<bool> {
        match line {
            "" => {},
            "exit" => {
                println!("Exiting program.");
                return Ok(false);
            },
            "initialize" => self.cmd_initialize(),
            "help" => print_help(),
            "scheduler-start" => self.scheduler.start(),
            "scheduler-test" => self.scheduler.test(),
            "scheduler-stop" => {
                self.scheduler.stop_generator();
                println!("Scheduler generator stopped.");
            },
            "process-smi" => {
                print!(
                    "{}",
                    render_process_smi(&self.registry, self.config.max_overall_mem)
                );
            },
            "vmstat" => self.cmd_vmstat(),
            "report-util" => self.cmd_report_util(),
            _ => match line.strip_prefix("screen") {
                Some(args) => self.cmd_screen(args, lines)?,
                None => println!("Unknown command: {}", line),
            },
        }
        Ok(true)
    }

    fn cmd_initialize(&mut self) {
        match Config::load(CONFIG_FILE) {
            Ok(config) => {
                if self.scheduler.set_config(SchedulerConfig::from(&config)) {
                    self.memory.set_capacity(config.max_frames());
                    self.config = config;
                    println!("Configuration loaded.");
                } else {
                    println!("Scheduler is running; stop it before re-initializing.");
                }
            },
            Err(e @ ConfigError::Io(_)) => println!("Cannot load {}: {}", CONFIG_FILE, e),
            Err(e) => println!("Configuration error: {}", e),
        }
    }

    fn cmd_vmstat(&self) {
        match write_vmstat(
            VMSTAT_FILE,
            &self.registry,
            &self.ticks,
            self.config.max_overall_mem,
        ) {
            Ok(()) => println!("Memory statistics written to {}", VMSTAT_FILE),
            Err(e) => println!("Unable to write {}: {}", VMSTAT_FILE, e),
        }
        match self.memory.dump_backing_store(BACKING_STORE_FILE) {
            Ok(()) => println!("Backing store written to {}", BACKING_STORE_FILE),
            Err(e) => println!("Unable to write {}: {}", BACKING_STORE_FILE, e),
        }
    }

    fn cmd_report_util(&self) {
        let report = render_report_util(
            &self.registry,
            self.config.num_cpu,
            self.memory.used_frames(),
            self.memory.capacity(),
        );
        match append_report(REPORT_FILE, &report) {
            Ok(()) => println!("Report saved to {}", REPORT_FILE),
            Err(e) => println!("Unable to write {}: {}", REPORT_FILE, e),
        }
    }

    fn cmd_screen<I: BufRead>(&mut self, args: &str, lines: &mut Lines<I>) -> io::Result<()> {
        let args = args.trim();
        if args == "-ls" {
            print!("{}", render_screen_ls(&self.registry));
            return Ok(());
        }

        if let Some(rest) = args.strip_prefix("-s ") {
            let mut parts = rest.trim().split_whitespace();
            let name = match parts.next() {
                Some(name) => name.to_owned(),
                None => {
                    println!("Unknown screen parameters.");
                    return Ok(());
                },
            };
            return match parts.next() {
                // screen -s <name>: open the console of an existing process
                None => self.open_console(&name, false, lines),
                // screen -s <name> <mem>: create from typed instructions
                Some(mem) => self.create_interactive(&name, mem, lines),
            };
        }

        if let Some(rest) = args.strip_prefix("-r ") {
            let name = rest.trim().to_owned();
            return self.open_console(&name, true, lines);
        }

        if let Some(rest) = args.strip_prefix("-c ") {
            self.create_and_run(rest.trim());
            return Ok(());
        }

        println!("Unknown screen parameters.");
        Ok(())
    }

    /// `screen -s <name>` / `screen -r <name>`; the latter requires the
    /// process to have been screened before
    fn open_console<I: BufRead>(
        &self,
        name: &str,
        require_screened: bool,
        lines: &mut Lines<I>,
    ) -> io::Result<()> {
        let process = match self.registry.find(name) {
            Some(process) if process.state() != ProcessState::Finished => process,
            _ => {
                println!("Process {} not found.", name);
                return Ok(());
            },
        };
        if require_screened && !process.is_screened() {
            println!("Process {} has not been accessed before. Use -s first.", name);
            return Ok(());
        }
        self.console(&process, lines)
    }

    /// The per-process console: `process-smi` and `exit`
    fn console<I: BufRead>(&self, process: &Process, lines: &mut Lines<I>) -> io::Result<()> {
        process.mark_screened();
        println!("=== Screen: {} ===", process.name());
        loop {
            print!("\nroot:/> ");
            io::stdout().flush()?;
            let line = match lines.next() {
                Some(line) => line?,
                None => return Ok(()),
            };
            match line.trim() {
                "exit" => break,
                "process-smi" => print!("{}", render_process_console_smi(process)),
                _ => println!("Unknown command. Supported commands: 'exit', 'process-smi'"),
            }
        }
        Ok(())
    }

    /// `screen -s <name> <mem>`: read instruction lines until a blank
    /// line, then create the process and open its console
    fn create_interactive<I: BufRead>(
        &self,
        name: &str,
        mem: &str,
        lines: &mut Lines<I>,
    ) -> io::Result<()> {
        let mem: u32 = match mem.parse() {
            Ok(mem) => mem,
            Err(_) => {
                println!("Invalid memory size: {}", mem);
                return Ok(());
            },
        };
        if !valid_memory_size(mem) {
            println!("Invalid memory allocation. Must be a power of 2 between 64 and 216 KiB.");
            return Ok(());
        }

        println!("Enter instructions (finish with a blank line):");
        let mut program = Vec::new();
        loop {
            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            let line = line.trim().to_owned();
            if line.is_empty() {
                break;
            }
            program.push(line);
        }

        match self.registry.create_process(name, mem, &program.join("; ")) {
            Ok(process) => {
                println!("Process {} created with PID {}.", name, process.pid());
                self.console(&process, lines)
            },
            Err(e) => {
                println!("Error creating process: {}", e);
                Ok(())
            },
        }
    }

    /// `screen -c <name> <mem> "<instructions>"`: create and run to
    /// completion synchronously, echoing the log as it grows
    fn create_and_run(&self, args: &str) {
        let mut parts = args.split_whitespace();
        let (name, mem) = match (parts.next(), parts.next()) {
            (Some(name), Some(mem)) => (name.to_owned(), mem),
            _ => {
                println!("Invalid screen -c command format.");
                return;
            },
        };
        let mem: u32 = match mem.parse() {
            Ok(mem) => mem,
            Err(_) => {
                println!("Invalid screen -c command format.");
                return;
            },
        };
        let text = match (args.find('"'), args.rfind('"')) {
            (Some(first), Some(last)) if last > first => &args[first + 1..last],
            _ => {
                println!("Instructions string missing or invalid.");
                return;
            },
        };
        if !valid_memory_size(mem) {
            println!("Invalid memory allocation. Must be a power of 2 between 64 and 216 KiB.");
            return;
        }

        let process = match self.registry.create_process(&name, mem, text.trim()) {
            Ok(process) => process,
            Err(e) => {
                println!("Error creating process: {}", e);
                return;
            },
        };
        process.mark_screened();
        println!("Process {} created with PID {}.", name, process.pid());

        if process.try_claim() {
            let ctx = self.exec_ctx();
            while process.state() == ProcessState::Running {
                process.execute_next_instruction(0, &ctx);
                if let Some(entry) = process.last_log() {
                    println!("{}", entry);
                }
            }
        } else {
            // A scheduler worker claimed it first; let it finish there
            while process.state() != ProcessState::Finished {
                thread::sleep(Duration::from_millis(20));
            }
        }
        println!("Process finished.");
    }
}

fn print_help() {
    println!("Available commands:");
    println!(" initialize                     - Load configuration from config.txt");
    println!(" scheduler-start                - Start core workers and the generator");
    println!(" scheduler-test                 - Start with a short generation interval");
    println!(" scheduler-stop                 - Stop the generator");
    println!(" screen -s <name> <memory>      - Create a process from typed instructions");
    println!(" screen -s <name>               - Open a process console");
    println!(" screen -r <name>               - Re-open a process console");
    println!(" screen -c <name> <mem> \"inst\"  - Create and run a process synchronously");
    println!(" screen -ls                     - List running and finished processes");
    println!(" process-smi                    - Summarized memory / CPU usage");
    println!(" vmstat                         - Write detailed statistics to {}", VMSTAT_FILE);
    println!(" report-util                    - Append a utilization report to {}", REPORT_FILE);
    println!(" exit                           - Quit");
}
