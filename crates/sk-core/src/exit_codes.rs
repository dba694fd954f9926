//! Process exit codes.
//!
//! Hotkey wrappers branch on these instead of parsing output, so values and
//! names never change once released. 0-4 are outcomes, 10-19 are problems
//! the user can fix, 20+ are bugs or broken storage.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Nothing to do / all checks pass
    Clean = 0,

    /// Compatibility tests passed with warnings or skips
    Degraded = 1,

    /// Action taken (migration, regeneration, cleanup), all good
    Applied = 2,

    /// Action taken, partial failure; the capture workflow may still proceed
    PartialFail = 3,

    /// A critical compatibility check failed
    TestsFailed = 4,

    /// Invalid arguments
    ArgsError = 10,

    /// Another shotkit invocation holds the lock (retry later)
    LockError = 14,

    /// Invalid settings file
    ConfigError = 15,

    /// Internal error (bug - please report)
    InternalError = 20,

    /// Structural storage failure
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes after which the capture workflow may proceed (0-3).
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExitCode::Clean | ExitCode::Degraded | ExitCode::Applied | ExitCode::PartialFail
        )
    }

    /// Stable name used in JSON envelopes.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::Degraded => "OK_DEGRADED",
            ExitCode::Applied => "OK_APPLIED",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::TestsFailed => "ERR_TESTS_FAILED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::LockError => "ERR_LOCK",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
