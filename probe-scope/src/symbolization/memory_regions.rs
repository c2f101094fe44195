//! Memory region utilities for target address space analysis
//!
//! The map artifact's MEMORY CONFIGURATION table lists every region the
//! linker placed code or data into. Writes are only allowed inside one of
//! these regions, so a typo in a symbol table can't scribble over a
//! peripheral register block.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::domain::Address;

/// One row of the MEMORY CONFIGURATION table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    pub origin: u64,
    pub length: u64,
    pub used: u64,
    pub unused: u64,
}

impl MemoryRegion {
    /// One past the last address of the region
    #[must_use]
    pub fn end(&self) -> u64 {
        self.origin.saturating_add(self.length)
    }

    /// Check if an address falls within this memory region
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        addr.0 >= self.origin && addr.0 < self.end()
    }

    /// Check if `len` bytes starting at `addr` fit entirely inside the region
    #[must_use]
    pub fn contains_span(&self, addr: Address, len: u64) -> bool {
        self.contains(addr) && addr.0.saturating_add(len) <= self.end()
    }
}

/// Parse a MEMORY CONFIGURATION row
///
/// Format: `<name> <origin> <length> <used> <unused> [attr] [fill]`, every
/// numeric column in hexadecimal. Returns `None` for header, ruler and
/// `PAGE n:` lines.
#[must_use]
pub fn parse_region_row(line: &str) -> Option<MemoryRegion> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 || !super::map_file::is_identifier(parts[0]) {
        return None;
    }

    let hex = |s: &str| u64::from_str_radix(s, 16).ok();
    let region = MemoryRegion {
        name: parts[0].to_string(),
        origin: hex(parts[1])?,
        length: hex(parts[2])?,
        used: hex(parts[3])?,
        unused: hex(parts[4])?,
    };

    debug!(
        "Memory region {}: 0x{:x} - 0x{:x} ({} used)",
        region.name,
        region.origin,
        region.end(),
        region.used
    );
    Some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_region_contains() {
        let region = MemoryRegion {
            name: "RAMLS0".to_string(),
            origin: 0x1000,
            length: 0x1000,
            used: 0,
            unused: 0x1000,
        };

        assert!(region.contains(Address(0x1000)));
        assert!(region.contains(Address(0x1500)));
        assert!(region.contains(Address(0x1FFF)));
        assert!(!region.contains(Address(0x0FFF)));
        assert!(!region.contains(Address(0x2000)));
        assert!(!region.contains(Address(0x2001)));
    }

    #[test]
    fn test_contains_span_rejects_overhang() {
        let region =
            MemoryRegion { name: "R".to_string(), origin: 0x100, length: 0x10, used: 0, unused: 0 };
        assert!(region.contains_span(Address(0x10c), 4));
        assert!(!region.contains_span(Address(0x10e), 4));
    }

    #[test]
    fn test_parse_region_row() {
        let row = "  RAMM0                 00000123   000002dd  00000016  000002c7  RWIX";
        let region = parse_region_row(row).expect("row should parse");
        assert_eq!(region.name, "RAMM0");
        assert_eq!(region.origin, 0x123);
        assert_eq!(region.length, 0x2dd);
        assert_eq!(region.used, 0x16);
        assert_eq!(region.unused, 0x2c7);
    }

    #[test]
    fn test_parse_region_row_skips_headers() {
        assert!(parse_region_row("         name            origin    length      used     unused   attr    fill").is_none());
        assert!(parse_region_row("----------------------  --------  ---------  --------  --------  ----").is_none());
        assert!(parse_region_row("PAGE 0:").is_none());
    }
}
