//! labctl-core: pure session-lifecycle logic for the virtual lab launcher.
//!
//! No tokio, no HTTP, no clock. Every time-dependent function takes `now`
//! as a parameter; the runtime crate owns IO and timers and feeds results
//! back into [`machine::SessionMachine`].

pub mod error;
pub mod idle;
pub mod machine;
pub mod polling;
pub mod progress;
pub mod types;
pub mod wire;

pub use error::{ErrorKind, LabError, QuotaInfo};
pub use machine::{Effect, LifecycleEvent, Phase, RemoteLookup, SessionMachine, TimerKind};
pub use types::{PersistedViewState, Session, SessionStatus};
