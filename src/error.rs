//! Crate-wide error type
//!
//! Discovery misses are *not* errors (they yield an empty [`AppId`]);
//! this enum covers the hard-failure cases only.
//!
//! [`AppId`]: crate::appid::AppId

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A backend outlived its Registry.
    #[error("registry has been torn down")]
    RegistryLost,

    /// The Registry's cancellation token fired while an operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An instance had no primary PID where one was required.
    #[error("no primary pid for instance {0}")]
    NoPrimaryPid(String),

    /// OOM score outside the kernel's [-1000, 1000] range.
    #[error("oom score {0} out of range [-1000, 1000]")]
    OomScoreRange(i32),

    /// Operation routed to a backend that is only a stub contract.
    #[error("job backend does not implement this yet: {0}")]
    BackendUnsupported(&'static str),

    /// The worker thread could not be started.
    #[error("failed to start executor thread: {0}")]
    ExecutorStart(String),
}
