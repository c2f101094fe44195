//! Control script generation
//!
//! The debug engine runs JavaScript against its scripting environment. Every
//! round trip is a self-contained script of this shape:
//!
//! ```text
//! preamble   importPackage(...), ds.setConfig(ccxml)
//! open       openSession → target.connect → [loadProgram → runAsynch → sleep] → halt
//!            print CONNECTION_SUCCESS
//! body       caller-supplied statements (batch items, nothing for connect)
//! close      [runAsynch] → target.disconnect → print SESSION_CLOSED
//! on throw   print SESSION_ERROR:<message>
//! ```
//!
//! Only the sentinel lines below are interpreted by the session layer.

use std::fmt::Write as _;

use super::config::TargetConfig;

/// Printed once the core is connected and halted
pub const CONNECTION_SUCCESS: &str = "CONNECTION_SUCCESS";
/// Printed after a clean disconnect
pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
/// Prefix of the line printed when the session itself throws
pub const SESSION_ERROR: &str = "SESSION_ERROR:";

/// Name of the debug session variable inside generated scripts
pub const SESSION_VAR: &str = "debugSession";

const PREAMBLE: &str = "\
importPackage(Packages.com.ti.debug.engine.scripting);
importPackage(Packages.com.ti.ccstudio.scripting.environment);
importPackage(Packages.java.lang);

var ds = ScriptingEnvironment.instance().getServer(\"DebugServer.1\");
var debugSession = null;
";

/// Quote `raw` as a JavaScript string literal
#[must_use]
pub fn js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Indent every non-empty line of `body` by `depth` levels of four spaces
fn indent(body: &str, depth: usize) -> String {
    let pad = "    ".repeat(depth);
    body.lines()
        .map(|l| if l.trim().is_empty() { String::new() } else { format!("{pad}{l}") })
        .collect::<Vec<_>>()
        .join("\n")
}

fn open_session(target: &TargetConfig, load_firmware: bool) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "ds.setConfig({});", js_string(&target.ccxml.to_string_lossy()));
    let _ = writeln!(s, "debugSession = ds.openSession(\"*\", {});", js_string(&target.cpu));
    s.push_str("debugSession.target.connect();\n");
    if load_firmware {
        if let Some(firmware) = &target.firmware {
            let _ = writeln!(
                s,
                "debugSession.memory.loadProgram({});",
                js_string(&firmware.to_string_lossy())
            );
            s.push_str("debugSession.target.runAsynch();\n");
            let _ = writeln!(s, "Thread.sleep({});", target.settle_ms);
        }
    }
    s.push_str("debugSession.target.halt();\n");
    let _ = writeln!(s, "print(\"{CONNECTION_SUCCESS}\");");
    s
}

fn close_session(resume: bool) -> String {
    let mut s = String::new();
    if resume {
        s.push_str("debugSession.target.runAsynch();\n");
    }
    s.push_str("debugSession.target.disconnect();\n");
    let _ = writeln!(s, "print(\"{SESSION_CLOSED}\");");
    s
}

fn assemble(open: &str, body: &str, close: &str) -> String {
    let mut script = String::from(PREAMBLE);
    script.push_str("\ntry {\n");
    script.push_str(&indent(open, 1));
    script.push('\n');
    if !body.trim().is_empty() {
        script.push('\n');
        script.push_str(&indent(body, 1));
        script.push_str("\n\n");
    }
    script.push_str(&indent(close, 1));
    script.push_str("\n} catch (sessionError) {\n");
    let _ = writeln!(script, "    print(\"{SESSION_ERROR}\" + sessionError);");
    script.push_str("}\n");
    script
}

/// Script that opens the session, loads firmware if configured, and halts
#[must_use]
pub fn connect_script(target: &TargetConfig) -> String {
    assemble(&open_session(target, true), "", &close_session(true))
}

/// Wrap transaction `body` in the per-round-trip connect/halt preamble and
/// the closing disconnect
#[must_use]
pub fn transaction_script(target: &TargetConfig, body: &str) -> String {
    assemble(&open_session(target, false), body, &close_session(target.resume_after_transaction))
}

/// Script that resumes the core and releases it
#[must_use]
pub fn disconnect_script(target: &TargetConfig) -> String {
    assemble(&open_session(target, false), "", &close_session(true))
}

/// Extract the message of the first `SESSION_ERROR:` line, if any
#[must_use]
pub fn session_error(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix(SESSION_ERROR))
        .map(str::trim)
}
