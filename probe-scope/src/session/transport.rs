//! Engine transport
//!
//! A [`Transport`] executes one generated script and returns whatever the
//! engine printed. The session controller owns exactly one transport and
//! never calls it concurrently.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running engine is checked for exit
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything the engine produced for one script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl EngineOutput {
    /// Output with only stdout, as produced by a cleanly exiting engine
    #[must_use]
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self { stdout: stdout.into(), stderr: String::new(), exit_code: Some(0) }
    }

    #[must_use]
    pub fn contains(&self, sentinel: &str) -> bool {
        self.stdout.contains(sentinel)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("engine could not be started: {0}")]
    Unavailable(String),

    #[error("engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes generated scripts against the debug engine
pub trait Transport: Send {
    /// Run `script` to completion, or until `timeout` elapses
    ///
    /// # Errors
    /// `Timeout` once the deadline passes (the engine is killed),
    /// `Unavailable` when the engine can't be started
    fn run(&mut self, script: &str, timeout: Duration) -> Result<EngineOutput, TransportError>;

    /// Release any long-lived engine resources
    fn shutdown(&mut self) {}
}

/// Runs each script in a fresh engine process
///
/// The script is written to a temporary `.js` file passed as the engine's
/// only positional argument. stdout and stderr are drained on reader
/// threads so a chatty engine can't fill a pipe and stall.
///
/// The engine launcher is usually a shell wrapper around the JVM that owns
/// the probe, so on unix every engine runs in its own process group and
/// the whole group is killed on timeout. The timeout bounds the complete
/// run, including collecting output.
#[derive(Debug)]
pub struct SubprocessTransport {
    executable: PathBuf,
}

impl SubprocessTransport {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into() }
    }

    fn spawn(&self, script_path: &std::path::Path) -> Result<Child, TransportError> {
        let mut command = Command::new(&self.executable);
        command.arg(script_path).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().map_err(|e| {
            TransportError::Unavailable(format!("{}: {e}", self.executable.display()))
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    let Some(mut pipe) = pipe else { return };
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Output gathered from both pipes
#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Collected {
    fn push(&mut self, (stream, chunk): (Stream, Vec<u8>)) {
        match stream {
            Stream::Stdout => self.stdout.extend_from_slice(&chunk),
            Stream::Stderr => self.stderr.extend_from_slice(&chunk),
        }
    }

    /// Take chunks until both pipes close or `deadline` passes. Returns
    /// whether both pipes reached end of file.
    fn drain_until(&mut self, rx: &Receiver<(Stream, Vec<u8>)>, deadline: Instant) -> bool {
        loop {
            match rx.recv_deadline(deadline) {
                Ok(chunk) => self.push(chunk),
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    rx: &Receiver<(Stream, Vec<u8>)>,
    collected: &mut Collected,
) -> Result<Option<ExitStatus>, TransportError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        // Doubles as the poll sleep while the pipes are open
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => collected.push(chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// SIGKILL every process in the engine's group
///
/// The group id is the engine's pid (`process_group(0)`).
#[cfg(unix)]
#[allow(unsafe_code)] // killpg() requires unsafe
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else { return };
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!("killpg({pgid}): {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Kill the engine and everything it started
fn kill_engine(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

impl Transport for SubprocessTransport {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<EngineOutput, TransportError> {
        let mut file = tempfile::Builder::new().prefix("probe_scope_").suffix(".js").tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let started = Instant::now();
        let deadline = started + timeout;
        let mut child = self.spawn(file.path())?;
        let pid = child.id();
        debug!("Engine started (pid {pid}) for {}", file.path().display());

        let (tx, rx) = unbounded();
        drain(child.stdout.take(), Stream::Stdout, tx.clone());
        drain(child.stderr.take(), Stream::Stderr, tx);

        let mut collected = Collected::default();
        let Some(status) = wait_with_deadline(&mut child, deadline, &rx, &mut collected)? else {
            warn!("Engine exceeded {timeout:?}, killing process group {pid}");
            kill_engine(&mut child);
            return Err(TransportError::Timeout(timeout));
        };

        if !collected.drain_until(&rx, deadline) {
            // Something the engine spawned still holds its pipes open
            warn!("Engine {pid} exited but left processes holding its output, killing them");
            kill_group(pid);
            collected.drain_until(&rx, Instant::now() + POLL_INTERVAL);
        }

        let output = EngineOutput {
            stdout: String::from_utf8_lossy(&collected.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&collected.stderr).into_owned(),
            exit_code: status.code(),
        };

        for line in output.stderr.lines().filter(|l| !l.trim().is_empty() && !l.contains("SLF4J")) {
            debug!("engine stderr: {line}");
        }
        debug!("Engine exited with {status} after {:?}", started.elapsed());
        Ok(output)
    }
}
