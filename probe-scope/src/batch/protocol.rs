//! One transaction, one round trip

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use super::markers::{is_valid_expression, parse_transcript, Marker};
use crate::domain::{Address, ItemError, TransactionError, Value};
use crate::session::script::{self, CONNECTION_SUCCESS, SESSION_VAR};
use crate::session::SessionController;
use crate::symbolization::{Symbol, SymbolResolver, SymbolTable};

/// Width of the raw memory fallback read for root symbols
const RAW_READ_BITS: u32 = 32;

/// Access width of a raw memory item
///
/// C28x memory is addressed in 16-bit words, so a 32-bit access spans two
/// addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    #[default]
    Word16,
    Word32,
}

impl Width {
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(Width::Word16),
            32 => Some(Width::Word32),
            _ => None,
        }
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            Width::Word16 => 16,
            Width::Word32 => 32,
        }
    }

    /// Addresses covered by one access
    #[must_use]
    pub fn span(self) -> u64 {
        u64::from(self.bits() / 16)
    }

    #[must_use]
    pub fn max_value(self) -> u64 {
        (1u64 << self.bits()) - 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Read,
    Write(Value),
    /// Raw read of `width` at `address`, no symbol involved
    ReadMemory { address: Address, width: Width },
    /// Raw write followed by a read-back of the same location
    WriteMemory { address: Address, width: Width, value: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub name: String,
    pub op: Operation,
}

/// Ordered batch of reads and writes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    items: Vec<Request>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every name in order
    #[must_use]
    pub fn reads<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: names.into_iter().map(|n| Request { name: n.into(), op: Operation::Read }).collect(),
        }
    }

    #[must_use]
    pub fn read(mut self, name: impl Into<String>) -> Self {
        self.items.push(Request { name: name.into(), op: Operation::Read });
        self
    }

    #[must_use]
    pub fn write(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.items.push(Request { name: name.into(), op: Operation::Write(value.into()) });
        self
    }

    /// Raw read, reported under the address (`0x0000d3c0`)
    #[must_use]
    pub fn read_memory(mut self, address: Address, width: Width) -> Self {
        self.items.push(Request { name: address.to_string(), op: Operation::ReadMemory { address, width } });
        self
    }

    /// Raw write with read-back, reported under the address
    #[must_use]
    pub fn write_memory(mut self, address: Address, width: Width, value: u64) -> Self {
        self.items.push(Request {
            name: address.to_string(),
            op: Operation::WriteMemory { address, width, value },
        });
        self
    }

    #[must_use]
    pub fn items(&self) -> &[Request] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Outcome of one item, in request order
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub name: String,
    pub outcome: Result<Value, ItemError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionResult {
    items: Vec<ItemResult>,
    round_trip: bool,
}

impl TransactionResult {
    #[must_use]
    pub fn items(&self) -> &[ItemResult] {
        &self.items
    }

    /// Outcome of the first item called `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Result<Value, ItemError>> {
        self.items.iter().find(|i| i.name == name).map(|i| &i.outcome)
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|o| o.as_ref().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter()
    }

    /// Names of the items that failed
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.items.iter().filter(|i| i.outcome.is_err()).map(|i| i.name.as_str()).collect()
    }

    /// Whether the engine was actually invoked
    #[must_use]
    pub fn round_trip(&self) -> bool {
        self.round_trip
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Promote any per-item failure to a wholesale error
    ///
    /// # Errors
    /// `PartialFailure` naming every failed item
    pub fn require_all(self) -> Result<Self, TransactionError> {
        let failed: Vec<String> = self.failed().into_iter().map(str::to_string).collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(TransactionError::PartialFailure { failed, total: self.items.len() })
        }
    }
}

/// What a planned item does on the target
enum Step<'a> {
    Read { expression: &'a str, symbol: &'a Symbol },
    Write { expression: &'a str, symbol: &'a Symbol, value: &'a Value },
    ReadMemory { address: Address, width: Width },
    WriteMemory { address: Address, width: Width, value: u64 },
}

/// An item that survived validation and goes into the script
struct Planned<'a> {
    index: usize,
    /// Name its markers are printed under
    key: Cow<'a, str>,
    step: Step<'a>,
}

/// Marker name for a raw memory item; addresses aren't identifiers
fn memory_key(address: Address) -> String {
    format!("mem_{:08x}", address.0)
}

/// Packs a [`Transaction`] into one engine script and demultiplexes the
/// printed markers back into per-item outcomes.
///
/// Logical names (e.g. `motorState`) may be mapped to target expressions
/// (`motorVars_M1.motorState`) through `aliases`. Markers are always printed
/// under the requested name.
pub struct BatchProtocol {
    session: Arc<SessionController>,
    resolver: Arc<SymbolResolver>,
    aliases: HashMap<String, String>,
}

impl BatchProtocol {
    #[must_use]
    pub fn new(session: Arc<SessionController>, resolver: Arc<SymbolResolver>) -> Self {
        Self { session, resolver, aliases: HashMap::new() }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<SymbolResolver> {
        &self.resolver
    }

    /// Target expression a requested name stands for
    #[must_use]
    pub fn expression_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    fn plan<'a>(
        &'a self,
        table: &'a SymbolTable,
        index: usize,
        request: &'a Request,
    ) -> Result<Planned<'a>, ItemError> {
        match &request.op {
            Operation::ReadMemory { address, width } => {
                return Ok(Planned {
                    index,
                    key: Cow::Owned(memory_key(*address)),
                    step: Step::ReadMemory { address: *address, width: *width },
                });
            }
            Operation::WriteMemory { address, width, value } => {
                if *value > width.max_value() {
                    return Err(ItemError::InvalidWrite(format!(
                        "{value} does not fit in {} bits",
                        width.bits()
                    )));
                }
                if !table.is_writable(*address, width.span()) {
                    return Err(ItemError::UnsafeAddress(*address));
                }
                return Ok(Planned {
                    index,
                    key: Cow::Owned(memory_key(*address)),
                    step: Step::WriteMemory { address: *address, width: *width, value: *value },
                });
            }
            Operation::Read | Operation::Write(_) => {}
        }

        let expression = self.expression_for(&request.name);
        if !is_valid_expression(&request.name) || !is_valid_expression(expression) {
            return Err(ItemError::InvalidName);
        }
        let symbol = table.resolve_expression(expression).map_err(|_| ItemError::NotFound)?;

        let step = match &request.op {
            Operation::Write(value) => {
                match value.as_f64() {
                    Some(v) if v.is_finite() => {}
                    _ => return Err(ItemError::InvalidWrite(format!("'{value}' is not a finite number"))),
                }
                if !table.is_writable(symbol.address, symbol.size.unwrap_or(1)) {
                    return Err(ItemError::UnsafeAddress(symbol.address));
                }
                Step::Write { expression, symbol, value }
            }
            _ => Step::Read { expression, symbol },
        };

        Ok(Planned { index, key: Cow::Borrowed(&request.name), step })
    }

    /// Execute a transaction in a single round trip
    ///
    /// Unresolvable or invalid items fail individually and never reach the
    /// engine. When nothing is left to send, no round trip is made.
    ///
    /// # Errors
    /// Wholesale failures only: the session rejected or timed out the round
    /// trip, or the engine printed neither `CONNECTION_SUCCESS` nor a single
    /// marker (the session is marked faulted)
    pub fn submit(&self, transaction: &Transaction) -> Result<TransactionResult, TransactionError> {
        let table = self.resolver.snapshot();
        let mut outcomes: Vec<Option<Result<Value, ItemError>>> = vec![None; transaction.len()];
        let mut planned = Vec::with_capacity(transaction.len());

        for (index, request) in transaction.items().iter().enumerate() {
            match self.plan(&table, index, request) {
                Ok(p) => planned.push(p),
                Err(e) => {
                    debug!("{}: {e}", request.name);
                    outcomes[index] = Some(Err(e));
                }
            }
        }

        let round_trip = !planned.is_empty();
        if round_trip {
            let body = render_body(&planned);
            let output = self.session.execute(&self.session.wrap_transaction(&body), None)?;
            let markers = parse_transcript(&output.stdout);

            if markers.is_empty() && !output.contains(CONNECTION_SUCCESS) {
                let reason = script::session_error(&output.stdout).map_or_else(
                    || format!("engine produced no output markers (exit {:?})", output.exit_code),
                    str::to_string,
                );
                self.session.fault(reason.clone());
                return Err(TransactionError::SessionFaulted(reason));
            }
            if let Some(err) = script::session_error(&output.stdout) {
                warn!("Session error mid-transaction: {err}");
            }

            for marker in markers {
                let slot = planned
                    .iter()
                    .find(|p| p.key == marker.name() && outcomes[p.index].is_none())
                    .map(|p| p.index);
                let Some(index) = slot else {
                    debug!("Ignoring marker for unexpected item {}", marker.name());
                    continue;
                };
                outcomes[index] = Some(match marker {
                    Marker::Value { value, .. } => Ok(value),
                    Marker::Error { reason, .. } => Err(ItemError::Engine(reason)),
                });
            }
        }

        let items = transaction
            .items()
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| ItemResult {
                name: request.name.clone(),
                outcome: outcome.unwrap_or(Err(ItemError::NoResponse)),
            })
            .collect();

        Ok(TransactionResult { items, round_trip })
    }
}

impl std::fmt::Debug for BatchProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProtocol").field("aliases", &self.aliases.len()).finish_non_exhaustive()
    }
}

fn render_body(planned: &[Planned<'_>]) -> String {
    let mut body = String::new();
    for (n, item) in planned.iter().enumerate() {
        render_item(&mut body, n, item);
    }
    body
}

/// One item, inside its own try/catch so a throw can't skip later items
fn render_item(out: &mut String, n: usize, item: &Planned<'_>) {
    let key = &item.key;
    let emit_var = |value: &str| format!("print(\"VAR:{key}=\" + {value});");

    match &item.step {
        Step::Read { expression, symbol } => {
            let address = symbol.address;
            let eval = evaluate(expression);
            let _ = writeln!(out, "// read {key} @ {address}");
            out.push_str("try {\n");
            if *expression == symbol.name {
                let raw = raw_read(address, RAW_READ_BITS);
                let _ = writeln!(out, "    try {{\n        {}\n    }} catch (evalError{n}) {{", emit_var(&eval));
                let _ = writeln!(out, "        try {{\n            {}\n        }} catch (memError{n}) {{\n            throw evalError{n};\n        }}\n    }}", emit_var(&raw));
            } else {
                let _ = writeln!(out, "    {}", emit_var(&eval));
            }
        }
        Step::Write { expression, symbol, value } => {
            let assignment = script::js_string(&format!("{expression} = {value}"));
            let _ = writeln!(out, "// write {key} @ {} = {value}", symbol.address);
            out.push_str("try {\n");
            let _ = writeln!(out, "    {SESSION_VAR}.expression.evaluate({assignment});");
            let _ = writeln!(out, "    {}", emit_var(&evaluate(expression)));
        }
        Step::WriteMemory { address, width, value } => {
            let _ = writeln!(out, "// write {key} @ {address} = {value}");
            out.push_str("try {\n");
            let _ = writeln!(out, "    {SESSION_VAR}.memory.writeData(0, {address}, {value}, {});", width.bits());
            let _ = writeln!(out, "    {}", emit_var(&raw_read(*address, width.bits())));
        }
        Step::ReadMemory { address, width } => {
            let _ = writeln!(out, "// read {key} @ {address}");
            out.push_str("try {\n");
            let _ = writeln!(out, "    {}", emit_var(&raw_read(*address, width.bits())));
        }
    }
    let _ = writeln!(
        out,
        "}} catch (itemError{n}) {{\n    print(\"ERR:{key}:\" + String(itemError{n}).replace(/\\s+/g, \" \"));\n}}"
    );
}

fn evaluate(expression: &str) -> String {
    format!("{SESSION_VAR}.expression.evaluate({})", script::js_string(expression))
}

fn raw_read(address: Address, bits: u32) -> String {
    format!("{SESSION_VAR}.memory.readData(0, {address}, {bits})")
}
