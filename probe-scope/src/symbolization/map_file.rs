//! Linker map artifact parsing
//!
//! The map artifact is plain text split into blank-line-delimited sections.
//! Three of them matter here:
//!
//! ```text
//! MEMORY CONFIGURATION
//!
//!          name            origin    length      used     unused   attr
//! ----------------------  --------  ---------  --------  --------  ----
//!   RAMLS0                0000c000   00000800  00000456  000003aa  RWIX
//!
//! SECTION ALLOCATION MAP
//!
//! .ebss      0    0000c000    00000456     UNINITIALIZED
//!                   0000c000    00000300     motor.obj (.ebss)
//!
//! GLOBAL SYMBOLS: SORTED BY Symbol Address
//!
//! page  address   name
//! ----  -------   ----
//! 0     0000c000  motorVars_M1
//! ```
//!
//! Symbol rows use a fixed positional grammar (`<decimal page> <hex address>
//! <identifier>`). When the artifact has no GLOBAL SYMBOLS header at all the
//! whole body is treated as a bare address/name list.

use std::collections::HashMap;

use log::debug;

use super::memory_regions::{parse_region_row, MemoryRegion};
use crate::domain::Address;

/// A symbol exactly as it appeared in the artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSymbol {
    pub name: String,
    pub address: Address,
}

/// An output section from the SECTION ALLOCATION MAP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSection {
    pub name: String,
    pub origin: u64,
    pub length: u64,
}

impl OutputSection {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.origin.saturating_add(self.length)
    }

    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        addr.0 >= self.origin && addr.0 < self.end()
    }
}

/// Everything extracted from one map artifact, in file order
///
/// Duplicate symbol names are preserved here; the symbol table decides which
/// occurrence wins.
#[derive(Debug, Default, Clone)]
pub struct MapFile {
    pub symbols: Vec<RawSymbol>,
    pub regions: Vec<MemoryRegion>,
    pub sections: Vec<OutputSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    MemoryConfiguration,
    SectionAllocation,
    GlobalSymbols,
    Other,
}

/// Headers of sections whose rows we never interpret
const IGNORED_HEADERS: &[&str] = &[
    "ENTRY POINT SYMBOL",
    "MODULE SUMMARY",
    "SEGMENT ALLOCATION MAP",
    "LINKER GENERATED COPY TABLES",
    "FAR CALL TRAMPOLINES",
    "CALL GRAPH",
];

fn classify_header(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    if trimmed.starts_with("MEMORY CONFIGURATION") {
        Some(Section::MemoryConfiguration)
    } else if trimmed.starts_with("SECTION ALLOCATION MAP") {
        Some(Section::SectionAllocation)
    } else if trimmed.starts_with("GLOBAL") && trimmed.contains("SYMBOLS") {
        Some(Section::GlobalSymbols)
    } else if IGNORED_HEADERS.iter().any(|h| trimmed.starts_with(h)) {
        Some(Section::Other)
    } else {
        None
    }
}

/// C identifier: letter or underscore, then letters, digits, underscores
#[must_use]
pub fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_hex(token: &str) -> bool {
    !token.is_empty() && token.len() <= 16 && token.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_page(token: &str) -> bool {
    !token.is_empty() && token.len() <= 4 && token.chars().all(|c| c.is_ascii_digit())
}

/// Parse a GLOBAL SYMBOLS row: `<decimal page> <hex address> <identifier>`
#[must_use]
pub fn parse_symbol_row(line: &str) -> Option<RawSymbol> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [page, address, name] = parts.as_slice() else {
        return None;
    };
    if !is_page(page) || !is_hex(address) || !is_identifier(name) {
        return None;
    }
    let address = u64::from_str_radix(address, 16).ok()?;
    Some(RawSymbol { name: (*name).to_string(), address: Address(address) })
}

/// Parse a SECTION ALLOCATION MAP output-section row:
/// `<.name> <page> <hex origin> <hex length> ...`
fn parse_section_row(line: &str) -> Option<OutputSection> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let name = parts[0];
    let named = name.strip_prefix('.').map_or(is_identifier(name), |rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || "_.:$".contains(c))
    });
    if !named || !is_page(parts[1]) || !is_hex(parts[2]) || !is_hex(parts[3]) {
        return None;
    }
    Some(OutputSection {
        name: name.to_string(),
        origin: u64::from_str_radix(parts[2], 16).ok()?,
        length: u64::from_str_radix(parts[3], 16).ok()?,
    })
}

impl MapFile {
    /// Parse the text body of a map artifact
    ///
    /// Never fails: rows that don't match a grammar are skipped. Callers
    /// decide whether an artifact with no symbols is acceptable.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let has_symbol_header =
            content.lines().any(|l| classify_header(l) == Some(Section::GlobalSymbols));

        let mut map = MapFile::default();
        let mut section = Section::Preamble;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(next) = classify_header(line) {
                section = next;
                continue;
            }

            match section {
                Section::MemoryConfiguration => {
                    if let Some(region) = parse_region_row(line) {
                        map.regions.push(region);
                    }
                }
                Section::SectionAllocation => {
                    if let Some(out) = parse_section_row(line) {
                        map.sections.push(out);
                    }
                }
                Section::GlobalSymbols => {
                    if let Some(sym) = parse_symbol_row(line) {
                        map.symbols.push(sym);
                    }
                }
                Section::Preamble | Section::Other if !has_symbol_header => {
                    if let Some(sym) = parse_symbol_row(line) {
                        map.symbols.push(sym);
                    }
                }
                Section::Preamble | Section::Other => {}
            }
        }

        debug!(
            "Parsed map: {} symbol rows, {} memory regions, {} output sections",
            map.symbols.len(),
            map.regions.len(),
            map.sections.len()
        );
        map
    }

    /// Output section containing `addr`, if any
    #[must_use]
    pub fn section_of(&self, addr: Address) -> Option<&OutputSection> {
        self.sections.iter().find(|s| s.length > 0 && s.contains(addr))
    }

    /// Estimate each symbol's size as the gap to the next symbol in the same
    /// output section, bounded by the section's end.
    ///
    /// Only the last occurrence of each name takes part, matching the symbol
    /// table's duplicate policy.
    #[must_use]
    pub fn estimate_sizes(&self) -> HashMap<String, u64> {
        let mut latest: HashMap<&str, Address> = HashMap::new();
        for sym in &self.symbols {
            latest.insert(sym.name.as_str(), sym.address);
        }

        let mut by_section: HashMap<&str, Vec<(Address, &str)>> = HashMap::new();
        for (name, addr) in &latest {
            if let Some(section) = self.section_of(*addr) {
                by_section.entry(section.name.as_str()).or_default().push((*addr, *name));
            }
        }

        let mut sizes = HashMap::new();
        for (section_name, mut members) in by_section {
            let Some(section) = self.sections.iter().find(|s| s.name == section_name) else {
                continue;
            };
            members.sort();
            for (idx, (addr, name)) in members.iter().enumerate() {
                let next = members[idx + 1..]
                    .iter()
                    .map(|(a, _)| a.0)
                    .find(|a| *a > addr.0)
                    .unwrap_or_else(|| section.end());
                let size = next.saturating_sub(addr.0);
                if size > 0 {
                    sizes.insert((*name).to_string(), size);
                }
            }
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_row() {
        let sym = parse_symbol_row("0     0000f580  motorVars_M1").unwrap();
        assert_eq!(sym.name, "motorVars_M1");
        assert_eq!(sym.address, Address(0xf580));
    }

    #[test]
    fn test_parse_symbol_row_tolerates_leading_whitespace() {
        let sym = parse_symbol_row("\t   1  0000d3c0   debug_bypass  ").unwrap();
        assert_eq!(sym.name, "debug_bypass");
        assert_eq!(sym.address, Address(0xd3c0));
    }

    #[test]
    fn test_parse_symbol_row_rejects_other_layouts() {
        // Input-section rows have more columns
        assert!(parse_symbol_row("0000c000    00000300     motor.obj (.ebss)").is_none());
        // Column headers and rulers
        assert!(parse_symbol_row("page  address   name").is_none());
        assert!(parse_symbol_row("----  -------   ----").is_none());
        // Page must be decimal
        assert!(parse_symbol_row("a     0000f580  motorVars_M1").is_none());
        // Identifier can't start with a digit
        assert!(parse_symbol_row("0     0000f580  1motor").is_none());
    }

    #[test]
    fn test_parse_section_row() {
        let out = parse_section_row(".ebss      0    0000c000    00000456     UNINITIALIZED").unwrap();
        assert_eq!(out.name, ".ebss");
        assert_eq!(out.origin, 0xc000);
        assert_eq!(out.length, 0x456);
        assert!(parse_section_row("                  0000c000    00000300     motor.obj (.ebss)")
            .is_none());
    }

    #[test]
    fn test_bare_list_without_headers() {
        let map = MapFile::parse("0 00001000 alpha\n\n   0 00001004 beta\n");
        let names: Vec<&str> = map.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_symbol_rows_outside_symbol_section_ignored_when_header_present() {
        let text = "\
MODULE SUMMARY

0     00002000  not_a_symbol

GLOBAL SYMBOLS: SORTED BY Symbol Address

0     00001000  real_symbol
";
        let map = MapFile::parse(text);
        assert_eq!(map.symbols.len(), 1);
        assert_eq!(map.symbols[0].name, "real_symbol");
    }

    #[test]
    fn test_estimate_sizes() {
        let text = "\
SECTION ALLOCATION MAP

.ebss      0    00001000    00000100     UNINITIALIZED

GLOBAL SYMBOLS

0     00001000  first
0     00001010  second
0     00002000  elsewhere
";
        let map = MapFile::parse(text);
        let sizes = map.estimate_sizes();
        assert_eq!(sizes.get("first"), Some(&0x10));
        assert_eq!(sizes.get("second"), Some(&0xf0));
        assert_eq!(sizes.get("elsewhere"), None);
    }
}
