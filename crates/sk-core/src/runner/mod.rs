//! External command execution.
//!
//! Every wrapped tool is resolved and invoked through [`CommandRunner`]. The
//! real implementation, [`SystemRunner`], provides:
//!
//! - Per-invocation timeout with SIGTERM → SIGKILL escalation
//! - Output size caps to prevent memory exhaustion
//! - Non-blocking pipe drains so daemonising tools (`wl-copy`) cannot hang us
//! - Optional stdin payloads
//!
//! [`ScriptedRunner`] replays canned outputs for tests.

mod scripted;

pub use scripted::{ScriptedReply, ScriptedRunner};

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Default timeout per invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum output size per stream in bytes (1MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes fed to stdin (stdin is null otherwise).
    pub stdin: Option<Vec<u8>>,
    /// Override timeout (None = runner default).
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs and check details.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                parts.push(format!("'{}'", arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Output from a finished (or timed-out) command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code (None when killed by a signal).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// stdout followed by stderr; help text lands on either.
    pub fn combined_text(&self) -> String {
        let mut text = self.stdout_str();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr_str());
        }
        text
    }

    /// Exit code 0 and no timeout.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// One-line description of a failure for check details.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {}ms", self.duration.as_millis());
        }
        let code = match self.exit_code {
            Some(code) => format!("exit {}", code),
            None => "killed by signal".to_string(),
        };
        let stderr = self.stderr_str();
        match stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => format!("{}: {}", code, line),
            None => code,
        }
    }
}

/// The narrow seam between shotkit and the outside world.
pub trait CommandRunner {
    /// Locate an executable; `None` means the tool is absent.
    fn resolve(&self, program: &str) -> Option<PathBuf>;

    /// Run to completion (or timeout).
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunError>;

    /// Start a long-lived helper that is terminated when the handle drops.
    fn spawn_background(&self, invocation: &Invocation) -> Result<BackgroundProcess, RunError>;
}

/// A helper process owned for a bounded scope.
///
/// Dropping the handle sends SIGTERM, then SIGKILL after a grace period.
#[derive(Debug)]
pub struct BackgroundProcess {
    program: String,
    child: Option<Child>,
}

impl BackgroundProcess {
    /// A handle with no real process behind it (scripted runs).
    pub fn detached(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Process id when a real child is attached.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            debug!(program = %self.program, pid = child.id(), "stopping background helper");
            kill_with_grace(&mut child);
        }
    }
}

/// Runner backed by real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    default_timeout: Duration,
    max_output_bytes: usize,
    path_var: Option<std::ffi::OsString>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SystemRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            path_var: std::env::var_os("PATH"),
        }
    }

    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    /// Resolve against an explicit search path instead of `$PATH`.
    pub fn with_search_path(mut self, path: impl Into<std::ffi::OsString>) -> Self {
        self.path_var = Some(path.into());
        self
    }

    fn validate(&self, program: &str) -> Result<(), RunError> {
        if program.is_empty() {
            return Err(RunError::InvalidCommand("empty program name".to_string()));
        }
        // Reject commands with shell metacharacters
        if program.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
            return Err(RunError::InvalidCommand(format!(
                "command contains shell metacharacters: {}",
                program
            )));
        }
        Ok(())
    }

    fn build_command(&self, program: &Path, args: &[String]) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        // Stable help/version text regardless of the user's locale.
        command.env("LC_ALL", "C");
        command.env("LANG", "C");
        if let Some(path) = &self.path_var {
            command.env("PATH", path);
        }
        command
    }

    /// Execute a child process with timeout and output capture.
    fn execute_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let start = Instant::now();
        let deadline = start + timeout;
        let max_output = self.max_output_bytes;
        let mut out = CommandOutput::default();

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut chunk = vec![0u8; 8192];

        loop {
            if Instant::now() >= deadline {
                out.timed_out = true;
                warn!(pid = child.id(), "command timed out, sending SIGTERM");
                kill_with_grace(child);
                break;
            }

            let mut did_read = false;
            if let Some(ref mut pipe) = stdout {
                if let Ok(n) = try_read_nonblocking(pipe, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut out.stdout, &chunk[..n], max_output, &mut out.truncated);
                    }
                }
            }
            if let Some(ref mut pipe) = stderr {
                if let Ok(n) = try_read_nonblocking(pipe, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut out.stderr, &chunk[..n], max_output, &mut out.truncated);
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // Process exited, drain what is immediately available
                    if let Some(ref mut pipe) = stdout {
                        let _ = drain_to_limit(pipe, &mut out.stdout, max_output, &mut out.truncated);
                    }
                    if let Some(ref mut pipe) = stderr {
                        let _ = drain_to_limit(pipe, &mut out.stderr, max_output, &mut out.truncated);
                    }
                    out.exit_code = status.code();
                    out.duration = start.elapsed();
                    trace!(exit_code = ?out.exit_code, "process exited");
                    return Ok(out);
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(RunError::Io(e));
                }
            }
        }

        // Timed out; reap whatever is left
        let status = child.wait().ok();
        out.exit_code = status.and_then(|s| s.code());
        out.duration = start.elapsed();
        Ok(out)
    }
}

impl CommandRunner for SystemRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return is_executable(&path).then_some(path);
        }
        let path_var = self.path_var.as_ref()?;
        std::env::split_paths(path_var)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunError> {
        self.validate(&invocation.program)?;
        let resolved = self
            .resolve(&invocation.program)
            .ok_or_else(|| RunError::NotFound(invocation.program.clone()))?;
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);

        debug!(
            command = %invocation.display(),
            timeout_ms = timeout.as_millis() as u64,
            "running command"
        );

        let mut command = self.build_command(&resolved, &invocation.args);
        command
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            error!(program = %invocation.program, error = %e, "failed to spawn");
            RunError::SpawnFailed {
                program: invocation.program.clone(),
                message: e.to_string(),
            }
        })?;

        if let Some(input) = &invocation.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // A tool that exits without reading stdin yields EPIPE; its
                // exit status tells the real story.
                if let Err(e) = pipe.write_all(input) {
                    debug!(program = %invocation.program, error = %e, "stdin write failed");
                }
            }
        }

        let output = self.execute_with_timeout(&mut child, timeout)?;
        debug!(
            command = %invocation.program,
            duration_ms = output.duration.as_millis() as u64,
            exit_code = ?output.exit_code,
            timed_out = output.timed_out,
            "command complete"
        );
        Ok(output)
    }

    fn spawn_background(&self, invocation: &Invocation) -> Result<BackgroundProcess, RunError> {
        self.validate(&invocation.program)?;
        let resolved = self
            .resolve(&invocation.program)
            .ok_or_else(|| RunError::NotFound(invocation.program.clone()))?;
        let child = self
            .build_command(&resolved, &invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RunError::SpawnFailed {
                program: invocation.program.clone(),
                message: e.to_string(),
            })?;
        debug!(program = %invocation.program, pid = child.id(), "background helper started");
        Ok(BackgroundProcess {
            program: invocation.program.clone(),
            child: Some(child),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    if space > 0 {
        let to_copy = data.len().min(space);
        buf.extend_from_slice(&data[..to_copy]);
        if data.len() > space {
            *truncated = true;
        }
    } else if !data.is_empty() {
        *truncated = true;
    }
}

/// Drain remaining data from a stream up to the limit.
///
/// Uses non-blocking reads so a grandchild still holding the pipe open
/// cannot stall us after the direct child exits.
#[cfg(unix)]
fn drain_to_limit<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        if *truncated {
            break;
        }
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => append_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn drain_to_limit(
    stream: &mut impl Read,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        if *truncated {
            break;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        append_capped(buf, &chunk[..n], max, truncated);
    }
    Ok(())
}

/// Kill a process with SIGTERM, then SIGKILL after the grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    trace!(pid, "sent SIGTERM");

    let deadline = Instant::now() + Duration::from_millis(SIGTERM_GRACE_MS);
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => {
                trace!(pid, "process exited after SIGTERM");
                return;
            }
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                error!(pid, error = %e, "failed to check process status");
                return;
            }
        }
    }

    warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of the read and restores the original
/// flags. Returns Ok(0) if no data is available (EAGAIN/EWOULDBLOCK).
#[cfg(unix)]
fn try_read_nonblocking<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}
