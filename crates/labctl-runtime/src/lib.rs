//! labctl-runtime: tokio/reqwest adapters and the lifecycle driver around
//! the pure `labctl-core` state machine.

pub mod activity;
pub mod api;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod polling;
pub mod quota;
pub mod render;
pub mod store;
pub mod timers;
pub mod token;
