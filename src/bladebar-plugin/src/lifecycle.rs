//! Wrapper exit codes and the supervisor's view of a worker's life.

use std::fmt;
use std::process::ExitStatus;

/// Exit status of a wrapper process. The panel relies on these exact codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum WrapperExit {
    Success = 0,
    Failure = 1,
    ArgumentsFailed = 2,
    PreinitFailed = 3,
    NoProvider = 4,
    SuccessAndRestart = 5,
}

impl WrapperExit {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WrapperExit::Success),
            1 => Some(WrapperExit::Failure),
            2 => Some(WrapperExit::ArgumentsFailed),
            3 => Some(WrapperExit::PreinitFailed),
            4 => Some(WrapperExit::NoProvider),
            5 => Some(WrapperExit::SuccessAndRestart),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, WrapperExit::Success | WrapperExit::SuccessAndRestart)
    }
}

impl From<WrapperExit> for std::process::ExitCode {
    fn from(exit: WrapperExit) -> Self {
        std::process::ExitCode::from(exit.code() as u8)
    }
}

impl fmt::Display for WrapperExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WrapperExit::Success => "success",
            WrapperExit::Failure => "failure",
            WrapperExit::ArgumentsFailed => "arguments failed",
            WrapperExit::PreinitFailed => "preinit failed",
            WrapperExit::NoProvider => "no provider",
            WrapperExit::SuccessAndRestart => "success, restart requested",
        };
        f.write_str(text)
    }
}

/// How a worker process ended, as observed by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with one of the wrapper's own codes.
    Exited(WrapperExit),
    /// Exited with a code the wrapper never uses.
    Code(i32),
    /// Killed by a signal (crash, kill).
    Signaled(Option<i32>),
    /// The exit status could not be collected.
    Lost,
}

impl WorkerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => {
                WrapperExit::from_code(code).map_or(WorkerExit::Code(code), WorkerExit::Exited)
            }
            None => WorkerExit::Signaled(signal_of(&status)),
        }
    }

    /// The caller is expected to spawn the same instance again.
    pub fn restart_requested(&self) -> bool {
        matches!(self, WorkerExit::Exited(WrapperExit::SuccessAndRestart))
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, WorkerExit::Exited(exit) if exit.is_success())
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exited(exit) => write!(f, "exited ({exit})"),
            WorkerExit::Code(code) => write!(f, "exited with unknown code {code}"),
            WorkerExit::Signaled(Some(signal)) => write!(f, "killed by signal {signal}"),
            WorkerExit::Signaled(None) => f.write_str("killed"),
            WorkerExit::Lost => f.write_str("exit status lost"),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Supervisor-side state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process launched, endpoint registered, wrapper not connected yet.
    Spawned,
    /// Wrapper connected to its endpoint.
    Connected,
    /// Frames have been exchanged over the connection.
    Active,
    /// Endpoint lost; waiting for the process exit to be collected.
    Terminated,
}
