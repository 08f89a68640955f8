//! Application launch and lifecycle coordination for a Linux user session.
//!
//! The crate fronts a job-control service (Upstart-style over D-Bus) and
//! the session's shell: it resolves application identifiers across
//! package stores, launches and stops units, tracks their process sets
//! through a cgroup manager, adjusts OOM priorities, and speaks the
//! shell's splash/resume/focus handshake protocols.
//!
//! ```text
//!   caller ──► Registry ──► stores (click / legacy / libertine / snap)
//!                 │
//!                 ├──► JobManager ──► Upstart D-Bus API
//!                 │         │
//!                 │         └──► handshake (shell broadcast surface)
//!                 │
//!                 └──► Instance ──► cgroup manager, signals, OOM tiers
//! ```
//!
//! All IPC runs on one background worker thread owned by the
//! [`Registry`]; public entry points bridge onto it, so callers never
//! share backend state across threads.

pub mod appid;
pub mod error;
pub mod executor;
pub mod helpers;
pub mod instance;
pub mod jobs;
pub mod oom;
pub mod registry;
pub mod stores;

mod activity;
mod cgroups;
mod handshake;

pub use appid::{AppId, AppName, Version};
pub use error::{Error, Result};
pub use executor::{Cancellable, Executor, TimeoutHandle};
pub use helpers::Helper;
pub use instance::Instance;
pub use jobs::{EnvBuilder, JobKind, LaunchMode};
pub use oom::OomScore;
pub use registry::{Application, BackendKind, ObserverHandle, Registry, RegistryConfig};
