//! CLI argument definitions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::batch::Width;
use crate::probe::ProbeConfig;

#[derive(Parser)]
#[command(
    name = "probe-scope",
    about = "Inspect and tune a live motor-control target through a debug probe",
    after_help = "\
EXAMPLES:
    probe-scope --map Debug/fw.map symbols motor          Search the map artifact
    probe-scope --map Debug/fw.map read motorState iqAmps Read two variables once
    probe-scope --map Debug/fw.map watch motorState --rate 2 --duration 30
    probe-scope --map Debug/fw.map write fluxCurrentAmps 1.5
    probe-scope --map Debug/fw.map peek 0xd3c0 --count 4    Raw 16-bit words
    probe-scope --map Debug/fw.map diagnose               Match known fault patterns"
)]
pub struct Args {
    /// JSON config file; flags given on the command line override it
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Linker map artifact of the running firmware
    #[arg(short, long, global = true, value_name = "FILE")]
    pub map: Option<PathBuf>,

    /// Debug engine launcher (dss.sh)
    #[arg(long, global = true, value_name = "PATH")]
    pub engine: Option<PathBuf>,

    /// Target configuration file naming probe and device
    #[arg(long, global = true, value_name = "FILE")]
    pub ccxml: Option<PathBuf>,

    /// Firmware image to load on connect (omit to attach to the running image)
    #[arg(long, global = true, value_name = "FILE")]
    pub firmware: Option<PathBuf>,

    /// Variable/fault knowledge table (JSON); built-in motor-control table otherwise
    #[arg(long, global = true, value_name = "FILE")]
    pub knowledge: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List map symbols, optionally filtered (substring or regex)
    Symbols {
        pattern: Option<String>,
    },

    /// Show what is known about a variable
    Describe {
        name: String,
    },

    /// Read variables once, in a single round trip
    Read {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Write a value and verify it by read-back
    Write {
        name: String,
        value: String,
    },

    /// Read raw memory words, bypassing the symbol table
    Peek {
        /// Start address (hex with 0x, or decimal)
        #[arg(value_parser = parse_number)]
        address: u64,

        /// Access width in bits (16 or 32)
        #[arg(long, default_value = "16", value_parser = parse_width)]
        bits: Width,

        /// Number of consecutive values
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Write a raw value inside a writable memory region and verify it
    Poke {
        #[arg(value_parser = parse_number)]
        address: u64,

        #[arg(value_parser = parse_number)]
        value: u64,

        /// Access width in bits (16 or 32)
        #[arg(long, default_value = "16", value_parser = parse_width)]
        bits: Width,
    },

    /// Poll variables continuously until Ctrl+C
    Watch {
        #[arg(required = true)]
        names: Vec<String>,

        /// Requested polling rate in Hz (capped by the monitor budget)
        #[arg(long, default_value = "2.0")]
        rate: f64,

        /// Stop after N seconds (0 = unlimited)
        #[arg(long, default_value = "0")]
        duration: u64,
    },

    /// Sample the fault-pattern variables and report matching diagnoses
    Diagnose {
        /// Seconds to wait for the first complete sample
        #[arg(long, default_value = "30")]
        wait: u64,
    },
}

/// `0x`-prefixed hex or plain decimal
fn parse_number(raw: &str) -> std::result::Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("'{raw}': {e}"))
}

fn parse_width(raw: &str) -> std::result::Result<Width, String> {
    raw.parse::<u32>()
        .ok()
        .and_then(Width::from_bits)
        .ok_or_else(|| format!("'{raw}': expected 16 or 32"))
}

impl Command {
    /// Whether the command talks to the target at all
    #[must_use]
    pub fn needs_engine(&self) -> bool {
        !matches!(self, Command::Symbols { .. } | Command::Describe { .. })
    }
}

impl Args {
    /// Build the probe configuration: config file first, then flags
    ///
    /// # Errors
    /// Unreadable or malformed config file
    pub fn probe_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                ProbeConfig::from_json(&json)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => ProbeConfig::default(),
        };

        if let Some(map) = &self.map {
            config.map.clone_from(map);
        }
        if let Some(engine) = &self.engine {
            config.engine.executable.clone_from(engine);
        }
        if let Some(ccxml) = &self.ccxml {
            config.target.ccxml.clone_from(ccxml);
        }
        if self.firmware.is_some() {
            config.target.firmware.clone_from(&self.firmware);
        }
        if self.knowledge.is_some() {
            config.knowledge.clone_from(&self.knowledge);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_watch() {
        let args = Args::parse_from([
            "probe-scope", "--map", "fw.map", "watch", "motorState", "iqAmps", "--rate", "5",
        ]);
        assert_eq!(
            args.command,
            Command::Watch {
                names: vec!["motorState".into(), "iqAmps".into()],
                rate: 5.0,
                duration: 0,
            }
        );
        assert!(args.command.needs_engine());
    }

    #[test]
    fn test_parse_raw_memory_commands() {
        let args = Args::parse_from(["probe-scope", "peek", "0xD3C0", "--bits", "32", "--count", "2"]);
        assert_eq!(args.command, Command::Peek { address: 0xd3c0, bits: Width::Word32, count: 2 });
        assert!(args.command.needs_engine());

        let args = Args::parse_from(["probe-scope", "poke", "54208", "0x1"]);
        assert_eq!(args.command, Command::Poke { address: 0xd3c0, value: 1, bits: Width::Word16 });

        assert!(Args::try_parse_from(["probe-scope", "peek", "0xd3c0", "--bits", "8"]).is_err());
        assert!(Args::try_parse_from(["probe-scope", "poke", "motorState", "1"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["probe-scope", "symbols", "motor", "--map", "fw.map"]);
        assert_eq!(args.map, Some(PathBuf::from("fw.map")));
        assert!(!args.command.needs_engine());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"map": "from_file.map", "target": {{"cpu": "C28xx_CPU2"}}, "monitor": {{"max_rate_hz": 4.0}}}}"#
        )
        .unwrap();
        let config_path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from([
            "probe-scope", "--config", &config_path, "--map", "flag.map", "read", "x",
        ]);
        let config = args.probe_config().unwrap();
        assert_eq!(config.map, PathBuf::from("flag.map"));
        assert_eq!(config.target.cpu, "C28xx_CPU2");
        assert!((config.monitor.max_rate_hz - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.engine.transaction_timeout_secs, 20);
    }
}
