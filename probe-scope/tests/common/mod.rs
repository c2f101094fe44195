//! Shared test helpers: a scriptable fake debug engine and map fixtures

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use probe_scope::session::{EngineOutput, Transport, TransportError};

/// Map artifact covering the built-in knowledge table's roots
pub const MOTOR_MAP: &str = "\
******************************************************************************
             TMS320C2000 Linker PC v22.6.1
******************************************************************************

MEMORY CONFIGURATION

         name            origin    length      used     unused   attr    fill
----------------------  --------  ---------  --------  --------  ----  --------
  RAMLS0                0000c000   00000800  00000456  000003aa  RWIX
  RAMGS0                0000d000   00001000  00000010  00000ff0  RWIX

SECTION ALLOCATION MAP

 output                                  attributes/
section   page    origin      length       input sections
--------  ----  ----------  ----------   ----------------
.ebss      0    0000c000    00000456     UNINITIALIZED
                  0000c000    00000300     motor.obj (.ebss)

.econst    0    00090000    00000100
                  00090000    00000100     tables.obj (.econst)

GLOBAL SYMBOLS: SORTED BY Symbol Address

page  address   name
----  -------   ----
0     0000c000  motorVars_M1
0     0000c300  debug_bypass
0     0000c340  systemVars
0     0000d000  gsScratch
0     00090000  sinTable
";

/// Write `text` to a fresh temporary map file
pub fn map_fixture(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".map").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Every invocation overruns its timeout
    Timeout,
    /// The engine exits without printing anything
    Crash,
    /// The engine executable can't be started
    Unavailable,
    /// Control scripts fail to open a session
    RejectConnect,
    /// Transactions die after answering this many items
    CrashAfter(usize),
}

pub struct FakeState {
    /// Current target values by item name, as the engine would print them
    pub values: HashMap<String, String>,
    /// Values that silently refuse writes (read-back returns this instead)
    pub stuck: HashMap<String, String>,
    pub latency: Duration,
    pub mode: Mode,
    /// Every script received, in order
    pub scripts: Vec<String>,
}

/// A debug engine double driven by the `// read` / `// write` headers the
/// batch protocol puts in front of every item
#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                values: HashMap::new(),
                stuck: HashMap::new(),
                latency: Duration::ZERO,
                mode: Mode::Normal,
                scripts: Vec::new(),
            })),
        }
    }

    pub fn with_values(pairs: &[(&str, &str)]) -> Self {
        let engine = Self::new();
        for (name, value) in pairs {
            engine.set(name, value);
        }
        engine
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.state().values.insert(name.to_string(), value.to_string());
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state().mode = mode;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state().scripts.clone()
    }

    /// Scripts that carried at least one item
    pub fn transaction_count(&self) -> usize {
        self.scripts().iter().filter(|s| is_transaction(s)).count()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    fn respond(&self, script: &str, limit: Option<usize>) -> String {
        let mut state = self.state();
        let mut out = String::from("CONNECTION_SUCCESS\n");
        let mut answered = 0;

        for line in script.lines().map(str::trim) {
            if limit.is_some_and(|limit| answered >= limit) && is_item_header(line) {
                // Died before this item ran
                return out;
            }
            answered += usize::from(is_item_header(line));
            if let Some(rest) = line.strip_prefix("// read ") {
                let name = rest.split(" @ ").next().unwrap_or(rest);
                match state.values.get(name) {
                    Some(v) => out.push_str(&format!("VAR:{name}={v}\n")),
                    None => out.push_str(&format!(
                        "ERR:{name}:com.ti.ccstudio.scripting.environment.ScriptingException: Identifier not found: {name}\n"
                    )),
                }
            } else if let Some(rest) = line.strip_prefix("// write ") {
                let name = rest.split(" @ ").next().unwrap_or(rest).to_string();
                let value = rest.rsplit(" = ").next().unwrap_or_default().to_string();
                let readback = match state.stuck.get(&name) {
                    Some(stuck) => stuck.clone(),
                    None => {
                        state.values.insert(name.clone(), value.clone());
                        value
                    }
                };
                out.push_str(&format!("VAR:{name}={readback}\n"));
            }
        }

        out.push_str("SESSION_CLOSED\n");
        out
    }
}

fn is_item_header(line: &str) -> bool {
    line.starts_with("// read ") || line.starts_with("// write ")
}

fn is_transaction(script: &str) -> bool {
    script.lines().map(str::trim).any(is_item_header)
}

impl Transport for FakeEngine {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<EngineOutput, TransportError> {
        let (latency, mode) = {
            let mut state = self.state();
            state.scripts.push(script.to_string());
            (state.latency, state.mode)
        };
        thread::sleep(latency);

        match mode {
            Mode::Unavailable => {
                Err(TransportError::Unavailable("dss.sh: No such file or directory".to_string()))
            }
            Mode::Timeout => Err(TransportError::Timeout(timeout)),
            Mode::Crash => Ok(EngineOutput {
                stdout: String::new(),
                stderr: "Segmentation fault".to_string(),
                exit_code: Some(139),
            }),
            Mode::RejectConnect if !is_transaction(script) => Ok(EngineOutput::from_stdout(
                "SESSION_ERROR:Error connecting to the target: (Error -151 @ 0x0) \
                 One of the FTDI driver functions used during the connect returned bad status\n",
            )),
            Mode::CrashAfter(n) if is_transaction(script) => Ok(EngineOutput {
                stdout: self.respond(script, Some(n)),
                stderr: "# A fatal error has been detected by the Java Runtime Environment".to_string(),
                exit_code: Some(134),
            }),
            Mode::RejectConnect | Mode::Normal | Mode::CrashAfter(_) => {
                Ok(EngineOutput::from_stdout(self.respond(script, None)))
            }
        }
    }
}

/// Poll `condition` every 10 ms until it holds or `limit` passes
pub fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
