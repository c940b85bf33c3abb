#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Setup failed and `onSetupError: abort` skipped the run.
    SetupFailed = 20,

    /// Invalid CLI/config/options (bad flags, invalid durations, invalid thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_report(passed: bool) -> Self {
        if passed {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }
}
