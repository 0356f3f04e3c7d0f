//! Sandboxed execution of candidate programs.
//!
//! Candidate programs are adversarially buggy by construction: mutation
//! routinely produces infinite loops and type errors. The executor reduces
//! any such pathology to a reportable outcome without destabilizing the
//! search driver.
//!
//! Each invocation runs a fresh short-lived interpreter subprocess driven by
//! an embedded shim. The shim loads the staged candidate file, calls the
//! requested entry point with JSON-decoded arguments, and replies with a
//! single JSON envelope on stdout; the candidate's own stdout is discarded so
//! it cannot corrupt the reply channel. On deadline expiry the subprocess is
//! killed outright, so a runaway candidate can never block a later
//! invocation. Arguments cross the process boundary as JSON, which makes
//! every call's argument list an independent deep copy.
//!
//! The same shim provides the coverage tracer: a `sys.settrace` hook records
//! line events whose source location resolves to the staged candidate file,
//! starting only once the entry point is called so host and module-definition
//! lines never contaminate the set. Trace invocations carry no deadline;
//! callers that need one wrap them with `invoke`.

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

const SHIM: &str = include_str!("shim.py");
const SHIM_FILE: &str = "_shim.py";

/// Default interpreter command, overridable through configuration.
pub const DEFAULT_PYTHON: &str = "python3";
/// Default hard cap on a single invocation.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

/// Host-side failures. Candidate pathologies are never errors; they surface
/// as [`InvokeOutcome`] variants instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare candidate scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("failed to stage candidate source: {0}")]
    Stage(#[source] std::io::Error),
    #[error("failed to launch interpreter `{python}`: {source}")]
    Launch {
        python: String,
        #[source]
        source: std::io::Error,
    },
    #[error("interpreter i/o failed: {0}")]
    Pipe(#[source] std::io::Error),
}

/// A staged candidate, addressable for invocation. Every load receives a
/// unique file name so no two candidates can ever collide.
#[derive(Debug, Clone)]
pub struct Handle {
    id: u64,
    path: PathBuf,
}

impl Handle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Result of invoking a candidate entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    Ok(Value),
    Timeout,
    RuntimeError(String),
    MissingFunction,
    LoadError(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    covered: Vec<u32>,
}

/// The narrow execution contract the search depends on: stage a candidate,
/// invoke it under a deadline, trace it. The harness and localizer consume
/// this trait, not [`Sandbox`] itself, so any backing that honors the
/// deadline, isolation, and unique-handle guarantees can stand in for the
/// subprocess mechanism.
pub trait Executor {
    /// Stage a candidate's source for invocation under a fresh unique name.
    fn load(&mut self, source: &str) -> Result<Handle, SandboxError>;

    /// Invoke `function` on a staged candidate under a wall-clock deadline.
    fn invoke(
        &self,
        handle: &Handle,
        function: &str,
        args: &[Value],
        deadline: Duration,
    ) -> Result<InvokeOutcome, SandboxError>;

    /// Run `function` under the per-line trace hook and return the set of
    /// 1-based line numbers of the candidate file executed before the call
    /// returned or raised. Exceptions are swallowed; trace invocations carry
    /// no deadline.
    fn trace(
        &self,
        handle: &Handle,
        function: &str,
        args: &[Value],
    ) -> Result<BTreeSet<u32>, SandboxError>;
}

/// Subprocess-backed executor owning the per-run scratch directory. The
/// directory holds the shim plus one file per staged candidate and is removed
/// when the sandbox is dropped, including on a run that terminates via a
/// discovered repair.
pub struct Sandbox {
    python: String,
    scratch: TempDir,
    shim_path: PathBuf,
    next_id: u64,
}

impl Sandbox {
    pub fn new(python: impl Into<String>) -> Result<Self, SandboxError> {
        let scratch = TempDir::with_prefix("mender-").map_err(SandboxError::Scratch)?;
        let shim_path = scratch.path().join(SHIM_FILE);
        fs::write(&shim_path, SHIM).map_err(SandboxError::Scratch)?;
        Ok(Self {
            python: python.into(),
            scratch,
            shim_path,
            next_id: 0,
        })
    }
}

impl Executor for Sandbox {
    fn load(&mut self, source: &str) -> Result<Handle, SandboxError> {
        let id = self.next_id;
        self.next_id += 1;
        let path = self.scratch.path().join(format!("candidate_{id:06}.py"));
        fs::write(&path, source).map_err(SandboxError::Stage)?;
        trace!(target: "sandbox", candidate = id, "staged");
        Ok(Handle { id, path })
    }

    fn invoke(
        &self,
        handle: &Handle,
        function: &str,
        args: &[Value],
        deadline: Duration,
    ) -> Result<InvokeOutcome, SandboxError> {
        let mut child = self.dispatch(handle, function, args, false)?;
        let status = child.wait_timeout(deadline).map_err(SandboxError::Pipe)?;
        if status.is_none() {
            // Deadline expired: kill outright and reap so nothing leaks.
            let _ = child.kill();
            let _ = child.wait();
            debug!(target: "sandbox", candidate = handle.id, function, "invoke_timeout");
            return Ok(InvokeOutcome::Timeout);
        }
        let outcome = read_envelope(&mut child).map(envelope_to_outcome)?;
        if !matches!(outcome, InvokeOutcome::Ok(_)) {
            debug!(target: "sandbox", candidate = handle.id, function, ?outcome, "invoke_failed");
        }
        Ok(outcome)
    }

    fn trace(
        &self,
        handle: &Handle,
        function: &str,
        args: &[Value],
    ) -> Result<BTreeSet<u32>, SandboxError> {
        let mut child = self.dispatch(handle, function, args, true)?;
        child.wait().map_err(SandboxError::Pipe)?;
        let envelope = read_envelope(&mut child)?;
        let covered: BTreeSet<u32> = match envelope {
            Some(env) if env.status == "ok" => env.covered.into_iter().collect(),
            // Load failures and missing entry points execute nothing.
            _ => BTreeSet::new(),
        };
        trace!(
            target: "sandbox",
            candidate = handle.id,
            function,
            lines = covered.len(),
            "trace_complete"
        );
        Ok(covered)
    }
}

impl Sandbox {
    fn dispatch(
        &self,
        handle: &Handle,
        function: &str,
        args: &[Value],
        trace: bool,
    ) -> Result<Child, SandboxError> {
        let request = serde_json::json!({
            "file": handle.path,
            "function": function,
            "args": args,
            "trace": trace,
        });
        let mut child = Command::new(&self.python)
            .arg(&self.shim_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SandboxError::Launch {
                python: self.python.clone(),
                source,
            })?;
        let Some(mut stdin) = child.stdin.take() else {
            return Err(SandboxError::Pipe(std::io::Error::other(
                "interpreter stdin unavailable",
            )));
        };
        let payload = request.to_string();
        // A reply of "no envelope" already covers a shim that died before
        // reading its request; a broken pipe here must not abort the search.
        if let Err(err) = stdin.write_all(payload.as_bytes()) {
            if err.kind() != ErrorKind::BrokenPipe {
                return Err(SandboxError::Pipe(err));
            }
        }
        drop(stdin);
        Ok(child)
    }
}

fn read_envelope(child: &mut Child) -> Result<Option<Envelope>, SandboxError> {
    let Some(mut stdout) = child.stdout.take() else {
        return Ok(None);
    };
    let mut reply = String::new();
    stdout
        .read_to_string(&mut reply)
        .map_err(SandboxError::Pipe)?;
    let envelope = reply
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line).ok());
    Ok(envelope)
}

fn envelope_to_outcome(envelope: Option<Envelope>) -> InvokeOutcome {
    let Some(envelope) = envelope else {
        return InvokeOutcome::RuntimeError("candidate produced no result envelope".to_string());
    };
    match envelope.status.as_str() {
        "ok" => InvokeOutcome::Ok(envelope.value),
        "missing_function" => InvokeOutcome::MissingFunction,
        "load_error" => InvokeOutcome::LoadError(envelope.message),
        _ => InvokeOutcome::RuntimeError(envelope.message),
    }
}
