//! Kernel host core
//!
//! Platform-independent half of the host:
//! - [`Bridge`]: the `kernel` import namespace of one execution context
//! - [`Orchestrator`]: boot, spawn queue and context bookkeeping
//! - [`BootConfig`]: run configuration
//!
//! Both halves talk to the platform only through the `lwk-hal` traits.

pub mod bridge;
pub mod config;
pub mod console;
pub mod devicetree;
mod error;
pub mod orchestrator;
pub mod protocol;
pub mod stacktrace;
pub mod time;

pub use bridge::{Bridge, IrqState, Syscall};
pub use config::BootConfig;
pub use console::ConsoleDecoder;
pub use error::{BootError, BridgeError, ConfigError};
pub use orchestrator::{ContextRecord, ContextState, Orchestrator, OrchestratorStats};

pub use lwk_hal::{ContextHal, ContextId, ContextMessage, ContextRole, HalError, SpawnRequest, HAL};
