//! # Symbol Resolution
//!
//! This module turns the linker map artifact produced by the firmware build
//! into a table of `name → (address, size, section)` entries. Everything
//! above it (batch transactions, telemetry, diagnosis) talks about variables
//! by name; this is the only place that knows where they live.
//!
//! ## The Map Artifact
//!
//! The TI linker writes a plain-text `.map` file next to the firmware image.
//! It is organised in named, blank-line-delimited sections:
//!
//! - **MEMORY CONFIGURATION**: every RAM/flash region with origin, length,
//!   used and unused bytes. Used here to reject writes that fall outside
//!   known memory.
//! - **SECTION ALLOCATION MAP**: output sections (`.ebss`, `.data`, ...) and
//!   the object files placed into them. Used to attribute symbols to a
//!   section and estimate their size.
//! - **GLOBAL SYMBOLS**: the `page address name` listing, sorted once by
//!   address and once by name. This is the symbol table proper.
//!
//! Artifacts that carry no GLOBAL SYMBOLS header are treated as a bare
//! address/name list.
//!
//! ## Resolution Flow
//!
//! ```text
//! 1. SymbolResolver::load("build/motor.map")
//!    read file → MapFile::parse → SymbolTable::from_map
//!
//! 2. Swap the new table in under the write lock
//!    (a failed parse never touches the live table)
//!
//! 3. resolve("motorVars_M1")            → Symbol { address: 0x0000f580, .. }
//!    resolve_expression("motorVars_M1.motorState")
//!                                       → root symbol motorVars_M1
//!    search(SearchPattern::parse("^angle"))
//!                                       → [angleENC, angleFOC]
//! ```
//!
//! ## Module Structure
//!
//! - **`map_file`**: section-aware text parser producing raw rows
//! - **`memory_regions`**: MEMORY CONFIGURATION rows and address checks
//! - **`symbol_table`**: the immutable table, search patterns and the
//!   reloadable [`SymbolResolver`]
//!
//! ## Limitations
//!
//! - **No type information**: the map carries addresses only. Struct member
//!   offsets are left to the debug engine's expression evaluator.
//! - **Sizes are estimates**: the gap to the next symbol includes padding.

pub mod map_file;
pub mod memory_regions;
pub mod symbol_table;

pub use map_file::MapFile;
pub use memory_regions::MemoryRegion;
pub use symbol_table::{SearchPattern, Symbol, SymbolResolver, SymbolTable};
