//! Deterministic [`CommandRunner`] for tests.
//!
//! # Example
//!
//! ```
//! use sk_core::runner::{CommandRunner, Invocation, ScriptedReply, ScriptedRunner};
//!
//! let runner = ScriptedRunner::new()
//!     .install("grim")
//!     .respond("grim", &["--version"], ScriptedReply::ok("grim version 1.4.1\n"));
//!
//! let out = runner.run(&Invocation::new("grim", ["--version"])).unwrap();
//! assert_eq!(out.stdout_str(), "grim version 1.4.1\n");
//! assert!(runner.resolve("slurp").is_none());
//! ```

use super::{BackgroundProcess, CommandOutput, CommandRunner, Invocation, RunError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Canned behaviour for matching invocations.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Bytes written to the path given as the final argument.
    pub writes_last_arg: Option<Vec<u8>>,
    /// Store stdin as the clipboard contents.
    pub captures_stdin: bool,
    /// Print the stored clipboard contents on stdout.
    pub replays_clipboard: bool,
}

impl ScriptedReply {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn fail(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    /// Killed after the timeout.
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn writes_file(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.writes_last_arg = Some(content.into());
        self
    }

    pub fn captures_stdin(mut self) -> Self {
        self.captures_stdin = true;
        self
    }

    pub fn replays_clipboard(mut self) -> Self {
        self.replays_clipboard = true;
        self
    }
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    arg_prefix: Vec<String>,
    reply: ScriptedReply,
}

/// Runner that resolves only installed programs and replays scripted replies.
///
/// Rules are matched in insertion order by program name and argument prefix;
/// an installed program with no matching rule exits 0 silently.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    installed: BTreeMap<String, PathBuf>,
    rules: Vec<Rule>,
    calls: RefCell<Vec<Invocation>>,
    background: RefCell<Vec<Invocation>>,
    clipboard: RefCell<Option<Vec<u8>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` resolvable at `/usr/bin/<program>`.
    pub fn install(mut self, program: &str) -> Self {
        self.installed
            .insert(program.to_string(), PathBuf::from("/usr/bin").join(program));
        self
    }

    pub fn respond(mut self, program: &str, arg_prefix: &[&str], reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_prefix: arg_prefix.iter().map(|s| s.to_string()).collect(),
            reply,
        });
        self
    }

    /// Every foreground invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Foreground invocations of one program.
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|inv| inv.program == program)
            .cloned()
            .collect()
    }

    /// Background helpers started so far.
    pub fn background_calls(&self) -> Vec<Invocation> {
        self.background.borrow().clone()
    }

    pub fn clipboard(&self) -> Option<Vec<u8>> {
        self.clipboard.borrow().clone()
    }

    fn find(&self, invocation: &Invocation) -> Option<&ScriptedReply> {
        self.rules
            .iter()
            .find(|rule| {
                rule.program == invocation.program
                    && invocation.args.len() >= rule.arg_prefix.len()
                    && rule
                        .arg_prefix
                        .iter()
                        .zip(&invocation.args)
                        .all(|(want, got)| want == got)
            })
            .map(|rule| &rule.reply)
    }
}

impl CommandRunner for ScriptedRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        self.installed.get(program).cloned()
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunError> {
        self.calls.borrow_mut().push(invocation.clone());
        if !self.installed.contains_key(&invocation.program) {
            return Err(RunError::NotFound(invocation.program.clone()));
        }
        let reply = match self.find(invocation) {
            Some(reply) => reply.clone(),
            None => ScriptedReply::ok(Vec::new()),
        };

        if let (Some(content), Some(target)) = (&reply.writes_last_arg, invocation.args.last()) {
            std::fs::write(target, content)?;
        }
        if reply.captures_stdin {
            *self.clipboard.borrow_mut() = invocation.stdin.clone();
        }
        let mut stdout = reply.stdout.clone();
        if reply.replays_clipboard {
            if let Some(content) = self.clipboard.borrow().as_ref() {
                stdout.extend_from_slice(content);
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr: reply.stderr.clone(),
            exit_code: if reply.timed_out { None } else { reply.exit_code },
            timed_out: reply.timed_out,
            truncated: false,
            duration: Duration::from_millis(1),
        })
    }

    fn spawn_background(&self, invocation: &Invocation) -> Result<BackgroundProcess, RunError> {
        if !self.installed.contains_key(&invocation.program) {
            return Err(RunError::NotFound(invocation.program.clone()));
        }
        self.background.borrow_mut().push(invocation.clone());
        Ok(BackgroundProcess::detached(invocation.program.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let runner = ScriptedRunner::new()
            .install("satty")
            .respond("satty", &["--version"], ScriptedReply::ok("satty 0.13.0"))
            .respond("satty", &[], ScriptedReply::fail(2, "usage"));
        let version = runner.run(&Invocation::new("satty", ["--version"])).unwrap();
        assert_eq!(version.stdout_str(), "satty 0.13.0");
        let other = runner.run(&Invocation::new("satty", ["--bogus"])).unwrap();
        assert_eq!(other.exit_code, Some(2));
        assert_eq!(runner.calls_to("satty").len(), 2);
    }

    #[test]
    fn uninstalled_program_is_not_found_but_recorded() {
        let runner = ScriptedRunner::new();
        let err = runner.run(&Invocation::new("grim", ["x"])).unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn clipboard_round_trip() {
        let runner = ScriptedRunner::new()
            .install("wl-copy")
            .install("wl-paste")
            .respond("wl-copy", &[], ScriptedReply::ok("").captures_stdin())
            .respond("wl-paste", &[], ScriptedReply::ok("").replays_clipboard());
        runner
            .run(&Invocation::new("wl-copy", Vec::<String>::new()).with_stdin("abc"))
            .unwrap();
        let out = runner
            .run(&Invocation::new("wl-paste", ["--no-newline"]))
            .unwrap();
        assert_eq!(out.stdout_str(), "abc");
    }

    #[test]
    fn writes_last_argument() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shot.png");
        let runner = ScriptedRunner::new()
            .install("grim")
            .respond("grim", &[], ScriptedReply::ok("").writes_file(b"\x89PNG".to_vec()));
        runner
            .run(&Invocation::new("grim", [target.display().to_string()]))
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"\x89PNG");
    }

    #[test]
    fn timeout_reply_has_no_exit_code() {
        let runner = ScriptedRunner::new()
            .install("slurp")
            .respond("slurp", &[], ScriptedReply::timeout());
        let out = runner.run(&Invocation::new("slurp", ["-h"])).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }
}
