use log::{info, warn};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use super::map_file::MapFile;
use super::memory_regions::MemoryRegion;
use crate::domain::{Address, ParseError, ResolveError};

/// A named location in target memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: Address,
    /// Estimated from the allocation map, absent for bare symbol lists
    pub size: Option<u64>,
    /// Output section containing the symbol
    pub section: Option<String>,
}

/// Pattern accepted by [`SymbolTable::search`]
///
/// Both forms match case-insensitively.
#[derive(Debug, Clone)]
pub enum SearchPattern {
    Substring(String),
    Regex(Regex),
}

impl SearchPattern {
    /// Build a regex pattern, falling back to a plain substring when the
    /// text isn't a valid regular expression.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => SearchPattern::Regex(re),
            Err(e) => {
                warn!("'{pattern}' is not a valid regex ({e}), using substring match");
                SearchPattern::substring(pattern)
            }
        }
    }

    #[must_use]
    pub fn substring(pattern: &str) -> Self {
        SearchPattern::Substring(pattern.to_lowercase())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            SearchPattern::Substring(needle) => name.to_lowercase().contains(needle.as_str()),
            SearchPattern::Regex(re) => re.is_match(name),
        }
    }
}

/// Immutable name → symbol table built from one map artifact
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    regions: Vec<MemoryRegion>,
    source: Option<PathBuf>,
}

impl SymbolTable {
    /// Build a table from a parsed artifact
    ///
    /// Names are case-sensitive. When a name occurs more than once the last
    /// occurrence wins.
    #[must_use]
    pub fn from_map(map: &MapFile) -> Self {
        let sizes = map.estimate_sizes();
        let mut symbols = HashMap::with_capacity(map.symbols.len());

        for raw in &map.symbols {
            let symbol = Symbol {
                name: raw.name.clone(),
                address: raw.address,
                size: sizes.get(&raw.name).copied(),
                section: map.section_of(raw.address).map(|s| s.name.clone()),
            };
            if let Some(previous) = symbols.insert(raw.name.clone(), symbol) {
                if previous.address != raw.address {
                    warn!(
                        "Duplicate symbol {}: {} replaced by {}",
                        raw.name, previous.address, raw.address
                    );
                }
            }
        }

        Self { symbols, regions: map.regions.clone(), source: None }
    }

    /// Read and parse a map artifact from disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains no symbols
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ParseError::Io { path: path.to_path_buf(), source })?;

        let map = MapFile::parse(&content);
        if map.symbols.is_empty() {
            return Err(ParseError::MalformedArtifact {
                path: path.to_path_buf(),
                reason: "no `<page> <address> <name>` symbol rows found".to_string(),
            });
        }

        let mut table = Self::from_map(&map);
        table.source = Some(path.to_path_buf());
        Ok(table)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Look up a symbol by exact name
    ///
    /// # Errors
    /// Returns `ResolveError::NotFound` when the name isn't in the table
    pub fn resolve(&self, name: &str) -> Result<&Symbol, ResolveError> {
        self.symbols.get(name).ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }

    /// Resolve the root symbol of a member or index expression
    /// (`motorVars_M1.Idq_out_A.value[0]` resolves through `motorVars_M1`).
    ///
    /// # Errors
    /// Returns `ResolveError::NotFound` when the root isn't in the table
    pub fn resolve_expression(&self, expression: &str) -> Result<&Symbol, ResolveError> {
        let root = expression.split(['.', '[']).next().unwrap_or(expression).trim();
        self.symbols.get(root).ok_or_else(|| ResolveError::NotFound(expression.to_string()))
    }

    /// All symbols matching `pattern`, ordered by name
    #[must_use]
    pub fn search(&self, pattern: &SearchPattern) -> Vec<&Symbol> {
        let mut found: Vec<&Symbol> =
            self.symbols.values().filter(|s| pattern.matches(&s.name)).collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Symbol names in sorted order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Whether `len` bytes at `addr` lie inside a listed memory region.
    /// Artifacts without a region table impose no restriction.
    #[must_use]
    pub fn is_writable(&self, addr: Address, len: u64) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r.contains_span(addr, len))
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Shared, reloadable view of the current symbol table
///
/// Readers take a cheap `Arc` snapshot; `load` parses into a fresh table and
/// swaps it in only on success, so a failed reload leaves the live table
/// untouched.
#[derive(Debug, Default)]
pub struct SymbolResolver {
    table: RwLock<Arc<SymbolTable>>,
}

impl SymbolResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_table(table: SymbolTable) -> Self {
        Self { table: RwLock::new(Arc::new(table)) }
    }

    /// Load (or reload) the map artifact at `path`
    ///
    /// # Errors
    /// Returns the parse error; the previously loaded table stays live
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize, ParseError> {
        let table = SymbolTable::load(path.as_ref())?;
        let count = table.len();
        info!(
            "Loaded {} symbols and {} memory regions from {}",
            count,
            table.regions().len(),
            path.as_ref().display()
        );
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        Ok(count)
    }

    /// Current table
    #[must_use]
    pub fn snapshot(&self) -> Arc<SymbolTable> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// # Errors
    /// Returns `ResolveError::NotFound` when the name isn't in the table
    pub fn resolve(&self, name: &str) -> Result<Symbol, ResolveError> {
        self.snapshot().resolve(name).cloned()
    }

    #[must_use]
    pub fn search(&self, pattern: &SearchPattern) -> Vec<Symbol> {
        self.snapshot().search(pattern).into_iter().cloned().collect()
    }

    #[must_use]
    pub fn memory_regions(&self) -> Vec<MemoryRegion> {
        self.snapshot().regions().to_vec()
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.snapshot().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> SymbolTable {
        SymbolTable::from_map(&MapFile::parse(text))
    }

    #[test]
    fn test_last_occurrence_wins() {
        let t = table("0 00001000 motorState\n0 00002000 motorState\n");
        assert_eq!(t.len(), 1);
        assert_eq!(t.resolve("motorState").unwrap().address, Address(0x2000));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let t = table("0 00001000 Speed\n0 00002000 speed\n");
        assert_eq!(t.resolve("Speed").unwrap().address, Address(0x1000));
        assert_eq!(t.resolve("speed").unwrap().address, Address(0x2000));
        assert!(t.resolve("SPEED").is_err());
    }

    #[test]
    fn test_resolve_expression_uses_root() {
        let t = table("0 0000f580 motorVars_M1\n");
        let sym = t.resolve_expression("motorVars_M1.Idq_out_A.value[0]").unwrap();
        assert_eq!(sym.name, "motorVars_M1");
        assert_eq!(
            t.resolve_expression("other.field"),
            Err(ResolveError::NotFound("other.field".to_string()))
        );
    }

    #[test]
    fn test_search_substring_is_case_insensitive_and_sorted() {
        let t = table("0 1 motorB\n0 2 MotorA\n0 3 speed\n");
        let found: Vec<&str> =
            t.search(&SearchPattern::substring("MOTOR")).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(found, vec!["MotorA", "motorB"]);
    }

    #[test]
    fn test_search_regex_and_fallback() {
        let t = table("0 1 angleFOC\n0 2 angleENC\n0 3 position\n");
        let found = t.search(&SearchPattern::parse("^angle"));
        assert_eq!(found.len(), 2);

        // Unbalanced bracket isn't a regex, falls back to substring
        let pattern = SearchPattern::parse("angle[");
        assert!(matches!(pattern, SearchPattern::Substring(_)));
        assert!(t.search(&pattern).is_empty());
    }

    #[test]
    fn test_search_results_are_reiterable() {
        let t = table("0 1 a1\n0 2 a2\n");
        let found = t.search(&SearchPattern::substring("a"));
        assert_eq!(found.iter().count(), 2);
        assert_eq!(found.iter().count(), 2);
    }

    #[test]
    fn test_is_writable_without_regions() {
        let t = table("0 1 a\n");
        assert!(t.is_writable(Address(0xdead_beef), 4));
    }
}
