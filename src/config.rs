//! Emulator configuration, read from `config.txt`.
//!
//! The file is line-oriented `key value` pairs separated by whitespace;
//! string values are quoted. Unknown keys are ignored.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_FILE: &str = "config.txt";

/// Ready-queue selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Fcfs,
    RoundRobin,
}

impl FromStr for Algorithm {
    type Err = ();

    /// Case-insensitive: accepts `fcfs` and `rr`
    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "fcfs" => Ok(Algorithm::Fcfs),
            "rr" => Ok(Algorithm::RoundRobin),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Algorithm::Fcfs => write!(f, "fcfs"),
            Algorithm::RoundRobin => write!(f, "rr"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub num_cpu: usize,
    pub scheduler: Algorithm,
    pub quantum_cycles: u32,
    /// Process generation interval, milliseconds
    pub batch_process_freq: u64,
    pub min_ins: u32,
    pub max_ins: u32,
    /// Sleep between executed instructions, milliseconds
    pub delay_per_exec: u64,
    /// Total emulated memory, bytes
    pub max_overall_mem: u64,
    /// Size of one physical frame, bytes
    pub mem_per_frame: u64,
    pub min_mem_per_proc: u64,
    pub max_mem_per_proc: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 1,
            scheduler: Algorithm::Fcfs,
            quantum_cycles: 100,
            batch_process_freq: 1,
            min_ins: 1,
            max_ins: 10,
            delay_per_exec: 0,
            max_overall_mem: 65536,
            mem_per_frame: 256,
            min_mem_per_proc: 64,
            max_mem_per_proc: 4096,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration: {}", e),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value {:?} for key {:?}", value, key)
            },
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some(kv) => kv,
                None => continue,
            };
            let value = value.trim().trim_matches('"');

            match key {
                "num-cpu" => config.num_cpu = parse_value(key, value)?,
                "scheduler" => {
                    config.scheduler = value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue {
                            key: key.to_owned(),
                            value: value.to_owned(),
                        })?;
                },
                "quantum-cycles" => config.quantum_cycles = parse_value(key, value)?,
                "batch-process-freq" => config.batch_process_freq = parse_value(key, value)?,
                "min-ins" => config.min_ins = parse_value(key, value)?,
                "max-ins" => config.max_ins = parse_value(key, value)?,
                "delay-per-exec" => config.delay_per_exec = parse_value(key, value)?,
                "max-overall-mem" => config.max_overall_mem = parse_value(key, value)?,
                "mem-per-frame" => config.mem_per_frame = parse_value(key, value)?,
                "min-mem-per-proc" => config.min_mem_per_proc = parse_value(key, value)?,
                "max-mem-per-proc" => config.max_mem_per_proc = parse_value(key, value)?,
                _ => log::debug!("Ignoring unknown config key {:?}", key),
            }
        }
        Ok(config)
    }

    /// Number of physical frames the memory manager gets
    pub fn max_frames(&self) -> usize {
        let per_frame = self.mem_per_frame.max(1);
        ((self.max_overall_mem / per_frame).max(1)) as usize
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}
