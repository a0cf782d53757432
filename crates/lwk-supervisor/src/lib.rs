//! Browser host for the kernel
//!
//! Runs a WebAssembly kernel as a simulated SMP machine: every execution
//! context (boot CPU, secondary CPU, kernel task) is a Web Worker that
//! instantiates the same compiled module against the same shared
//! `WebAssembly.Memory`.
//!
//! ## Module Structure
//!
//! - `supervisor` - main thread: [`start`] and the [`Supervisor`] handle
//! - `hal` - `HAL` implementation over Web Workers
//! - `context` - worker side: [`context_main`] and the `kernel` import table
//! - `memory` - `LinearMemory` over a `WebAssembly.Memory`
//!
//! ## Loading
//!
//! The page calls `start(configJson, kernelBytes)`. Workers are module
//! workers running `worker.js`, which initializes this crate and passes its
//! first message to `context_main`. The page must be cross-origin isolated
//! for shared memory to be available.

pub(crate) mod context;
pub(crate) mod hal;
pub(crate) mod memory;
pub(crate) mod supervisor;
pub(crate) mod util;

pub use context::{context_main, StartMessage, WorkerContextHal};
pub use hal::{ConsoleSink, Inbox, InboxItem, WebHal, WorkerHandle};
pub use memory::JsLinearMemory;
pub use supervisor::{start, Supervisor};
