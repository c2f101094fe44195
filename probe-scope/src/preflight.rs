//! Pre-flight checks for probe-scope
//!
//! Validates the files the debug engine will be pointed at before any
//! (slow) engine invocation. Provides clear, actionable error messages when
//! something is missing.

use anyhow::{bail, Context, Result};
use log::warn;
use std::path::Path;

use crate::probe::ProbeConfig;

/// Run all pre-flight checks
///
/// Offline commands (symbol listing and search) only need the map artifact;
/// pass `needs_engine = false` for those.
pub fn run_preflight_checks(config: &ProbeConfig, needs_engine: bool) -> Result<()> {
    check_map_artifact(&config.map)?;
    if needs_engine {
        check_engine(&config.engine.executable)?;
        check_target_config(&config.target.ccxml)?;
        if let Some(firmware) = &config.target.firmware {
            check_firmware(firmware)?;
        }
    }
    Ok(())
}

/// Check that the debug engine executable exists and can be run
fn check_engine(executable: &Path) -> Result<()> {
    if !executable.is_file() {
        bail!(
            "Debug engine not found: {}\n\n\
             Install the vendor debug server scripting package, or point\n\
             --engine at its launcher script (dss.sh).",
            executable.display()
        );
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(executable)
            .with_context(|| format!("Failed to stat {}", executable.display()))?
            .permissions()
            .mode();
        if mode & 0o111 == 0 {
            bail!(
                "Debug engine not executable: {}\n\n\
                 Fix with: chmod +x {}",
                executable.display(),
                executable.display()
            );
        }
    }

    Ok(())
}

/// Check that the linker map artifact exists and isn't empty
fn check_map_artifact(map: &Path) -> Result<()> {
    if map.as_os_str().is_empty() {
        bail!(
            "Missing required argument: --map\n\n\
             Pass the linker map produced by the firmware build, e.g.\n  \
             probe-scope --map Debug/firmware.map symbols"
        );
    }
    if !map.is_file() {
        bail!(
            "Map artifact not found: {}\n\n\
             Rebuild the firmware with map output enabled (--map_file) and\n\
             make sure the path matches the image running on the target.",
            map.display()
        );
    }
    let len = std::fs::metadata(map)
        .with_context(|| format!("Failed to stat {}", map.display()))?
        .len();
    if len == 0 {
        bail!("Map artifact is empty: {}", map.display());
    }
    Ok(())
}

/// Check that the target configuration file exists
fn check_target_config(ccxml: &Path) -> Result<()> {
    if !ccxml.is_file() {
        bail!(
            "Target configuration not found: {}\n\n\
             Pass the .ccxml describing the probe and device with --ccxml.",
            ccxml.display()
        );
    }
    Ok(())
}

/// Check that the firmware image to load exists
fn check_firmware(firmware: &Path) -> Result<()> {
    if !firmware.is_file() {
        bail!(
            "Firmware image not found: {}\n\n\
             Build the firmware first, or omit --firmware to attach to the\n\
             image already running on the target.",
            firmware.display()
        );
    }
    if firmware.extension().is_some_and(|ext| ext != "out") {
        warn!("Firmware {} doesn't look like a .out image", firmware.display());
    }
    Ok(())
}
