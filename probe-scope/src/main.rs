//! # probe-scope - Main Entry Point
//!
//! Thin driver over [`TargetProbe`]:
//! - **Offline** (`symbols`, `describe`): map artifact and knowledge table only
//! - **One-shot** (`read`, `write`, `peek`, `poke`): one connect, one
//!   round trip
//! - **Continuous** (`watch`, `diagnose`): background monitoring until
//!   Ctrl+C, a duration limit, or a complete sample

#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use probe_scope::batch::{coerce, Width};
use probe_scope::cli::{Args, Command};
use probe_scope::domain::{Address, Timestamp};
use probe_scope::preflight::run_preflight_checks;
use probe_scope::probe::TargetProbe;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_UNAVAILABLE: i32 = 69;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("debug engine not found")
        || msg.contains("debug engine not executable")
        || msg.contains("engine unavailable")
    {
        EXIT_UNAVAILABLE
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.probe_config()?;

    run_preflight_checks(&config, args.command.needs_engine())?;

    let probe = TargetProbe::open(config).context("Failed to open probe")?;
    info!("{probe:?}");

    match args.command.clone() {
        Command::Symbols { pattern } => list_symbols(&probe, pattern.as_deref(), args.json),
        Command::Describe { name } => describe(&probe, &name, args.json),
        Command::Read { names } => {
            connect(&probe)?;
            let values = probe.read(&names);
            probe.disconnect();
            if args.json {
                let rendered: serde_json::Map<String, serde_json::Value> = values
                    .iter()
                    .map(|(name, outcome)| -> Result<_, serde_json::Error> {
                        let v = match outcome {
                            Ok(value) => serde_json::to_value(value)?,
                            Err(reason) => serde_json::json!({ "error": reason }),
                        };
                        Ok((name.clone(), v))
                    })
                    .collect::<Result<_, serde_json::Error>>()?;
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                for (name, outcome) in &values {
                    match outcome {
                        Ok(value) => println!("{name} = {}", render(&probe, name, value)),
                        Err(reason) => println!("{name}: {reason}"),
                    }
                }
            }
            Ok(())
        }
        Command::Write { name, value } => {
            connect(&probe)?;
            let result = probe.write(&name, coerce(&value));
            probe.disconnect();
            let verified = result?;
            if args.json {
                println!("{}", serde_json::json!({ "name": name, "verified": verified }));
            } else if verified {
                println!("{name} = {value} (verified)");
            } else {
                println!("{name}: write not verified");
            }
            if verified {
                Ok(())
            } else {
                anyhow::bail!("Write to {name} was not verified by read-back")
            }
        }
        Command::Peek { address, bits, count } => {
            connect(&probe)?;
            let values = probe.read_memory(Address(address), bits, count);
            probe.disconnect();
            let values = values?;
            if args.json {
                let rendered: Vec<_> = values
                    .iter()
                    .zip((0u64..).map(|i| Address(address + i * bits.span())))
                    .map(|(value, at)| serde_json::json!({ "address": at.to_string(), "value": value }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                let digits = match bits {
                    Width::Word16 => 4,
                    Width::Word32 => 8,
                };
                for (i, value) in (0u64..).zip(&values) {
                    let at = Address(address + i * bits.span());
                    match value.as_i64() {
                        Some(raw) => println!("{at}: 0x{raw:0digits$x}  ({value})"),
                        None => println!("{at}: {value}"),
                    }
                }
            }
            Ok(())
        }
        Command::Poke { address, value, bits } => {
            connect(&probe)?;
            let result = probe.write_memory(Address(address), bits, value);
            probe.disconnect();
            let verified = result?;
            let at = Address(address);
            if args.json {
                println!("{}", serde_json::json!({ "address": at.to_string(), "verified": verified }));
            } else if verified {
                println!("{at} = 0x{value:x} (verified)");
            } else {
                println!("{at}: write not verified");
            }
            if verified {
                Ok(())
            } else {
                anyhow::bail!("Write to {at} was not verified by read-back")
            }
        }
        Command::Watch { names, rate, duration } => {
            connect(&probe)?;
            let limit = (duration > 0).then(|| Duration::from_secs(duration));
            watch(&probe, &names, rate, limit, args.json).await
        }
        Command::Diagnose { wait } => {
            connect(&probe)?;
            let result = diagnose(&probe, Duration::from_secs(wait), args.json).await;
            probe.disconnect();
            result
        }
    }
}

fn connect(probe: &TargetProbe) -> Result<()> {
    eprintln!("connecting ({})...", probe.config().target.ccxml.display());
    probe.connect().context("Failed to connect to target")?;
    Ok(())
}

/// Value with enum label and units where the knowledge table has them
fn render(probe: &TargetProbe, name: &str, value: &probe_scope::domain::Value) -> String {
    probe
        .knowledge()
        .schema(name)
        .map_or_else(|| value.to_string(), |schema| schema.describe(value))
}

fn list_symbols(probe: &TargetProbe, pattern: Option<&str>, json: bool) -> Result<()> {
    let symbols = probe.search(pattern.unwrap_or(""));
    if json {
        println!("{}", serde_json::to_string_pretty(&symbols)?);
        return Ok(());
    }
    for symbol in &symbols {
        let size = symbol.size.map_or_else(|| "?".to_string(), |s| s.to_string());
        println!(
            "0x{:08x}  {:>6}  {:<12}  {}",
            symbol.address.0,
            size,
            symbol.section.as_deref().unwrap_or("-"),
            symbol.name
        );
    }
    eprintln!("{} symbols", symbols.len());
    Ok(())
}

fn describe(probe: &TargetProbe, name: &str, json: bool) -> Result<()> {
    let info = probe.describe(name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("{}  ({})", info.name, info.expression);
    if let Some(symbol) = &info.symbol {
        println!("  address: 0x{:08x}", symbol.address.0);
    }
    if let Some(schema) = &info.schema {
        println!("  type:    {}", schema.var_type);
        println!("  about:   {}", schema.description);
        if let Some(range) = &schema.valid_range {
            println!("  range:   [{}, {}]", range.min, range.max);
        }
        for (code, label) in &schema.enum_values {
            println!("  {code:>4} = {label}");
        }
    }
    Ok(())
}

async fn watch(
    probe: &TargetProbe,
    names: &[String],
    rate_hz: f64,
    limit: Option<Duration>,
    json: bool,
) -> Result<()> {
    let status = match probe.require_monitoring(names, rate_hz) {
        Ok(status) => status,
        Err(e) => {
            probe.disconnect();
            return Err(e.into());
        }
    };
    eprintln!(
        "watching {} variable(s): requested {:.1} Hz, effective {:.1} Hz",
        names.len(),
        status.requested_hz,
        status.effective_hz
    );

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let mut printed: HashMap<String, Timestamp> = HashMap::new();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        for name in names {
            let Some(reading) = probe.store().latest(name) else { continue };
            if printed.get(name) == Some(&reading.timestamp) {
                continue;
            }
            printed.insert(name.clone(), reading.timestamp);
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "name": name, "t": reading.timestamp.as_seconds(), "value": reading.value, "changed": reading.changed })
                );
            } else {
                let mark = if reading.changed { "*" } else { " " };
                println!(
                    "{:>12.3} {mark} {name} = {}",
                    reading.timestamp.as_seconds(),
                    render(probe, name, &reading.value)
                );
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    let effective = probe.store().effective_rate().unwrap_or(0.0);
    probe.disconnect();
    eprintln!(
        "\n{exit_reason}: {:.1}s, {:.2} Hz effective",
        started.elapsed().as_secs_f64(),
        effective
    );
    Ok(())
}

async fn diagnose(probe: &TargetProbe, wait: Duration, json: bool) -> Result<()> {
    let mut variables: Vec<String> = probe
        .knowledge()
        .patterns
        .iter()
        .flat_map(|p| p.conditions.iter().flat_map(|c| c.variables().map(str::to_string)))
        .collect();
    variables.sort_unstable();
    variables.dedup();

    probe.require_monitoring(&variables, 1.0)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let started = Instant::now();
    loop {
        let snapshot = probe.current_snapshot();
        if variables.iter().all(|v| snapshot.contains_key(v)) || started.elapsed() >= wait {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }
    probe.stop_monitoring();

    let snapshot = probe.current_snapshot();
    let missing: Vec<&str> =
        variables.iter().filter(|v| !snapshot.contains_key(*v)).map(String::as_str).collect();
    if !missing.is_empty() {
        eprintln!("warning: no reading for {}", missing.join(", "));
    }

    let matches = probe.diagnose();
    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }
    if matches.is_empty() {
        println!("No known fault pattern matches.");
    }
    for pattern in &matches {
        println!("[{}] {}: {}", pattern.severity, pattern.name, pattern.description);
        for rec in &pattern.recommendations {
            println!("    - {rec}");
        }
    }
    Ok(())
}
