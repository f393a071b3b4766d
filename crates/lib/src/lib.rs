//! Goose host core library: supervises locally spawned backend agent servers
//! (port allocation, environment, spawn, readiness, lifecycle) for the host CLI
//! and desktop shell.

pub mod backend;
pub mod config;
pub mod env;
pub mod init;
pub mod launch;
pub mod lifecycle;
pub mod locate;
pub mod port;
pub mod probe;
pub mod supervisor;

pub use lifecycle::{bind_lifecycle, InstanceHandle, InstanceRegistry};
pub use supervisor::{Instance, LaunchRequest, Supervisor, SupervisorConfig, SupervisorError};
