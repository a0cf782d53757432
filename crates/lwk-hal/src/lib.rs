//! Platform abstraction for the kernel host
//!
//! The host runs one execution context per virtual CPU or kernel task. Two
//! traits separate the platform from the host logic:
//!
//! - [`HAL`] is implemented by the supervisor side, which launches contexts
//!   and owns the compiled kernel and the shared memory.
//! - [`ContextHal`] is implemented once per execution context and is what
//!   the syscall bridge calls into.
//!
//! # Platform Implementations
//!
//! - **Browser**: Web Workers per context, `WebAssembly.Memory` with
//!   `shared: true`, `performance.now()` for time, `crypto.getRandomValues()`
//!   for entropy
//! - **Tests**: `lwk-hal-mock`, an in-process arena and recorded messages

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

/// WebAssembly page size
pub const PAGE_SIZE: usize = 64 * 1024;

// === Identity ===

/// Identity of an execution context, assigned by the orchestrator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl ContextId {
    /// The boot context is always the first one launched
    pub const BOOT: ContextId = ContextId(0);
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an execution context runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextRole {
    /// The first context; the only one allowed to fetch the device tree
    Boot,
    /// A secondary CPU entering its idle thread
    Secondary { cpu: u32, idle: u32 },
    /// A kernel task running on its own context
    Task { handle: u32, name: String },
}

impl ContextRole {
    /// Name of the kernel export this role calls
    pub fn entry_point(&self) -> &'static str {
        match self {
            ContextRole::Boot => "boot",
            ContextRole::Secondary { .. } => "secondary",
            ContextRole::Task { .. } => "task",
        }
    }

    /// Diagnostic label (worker name, log prefix)
    pub fn label(&self) -> String {
        match self {
            ContextRole::Boot => String::from("boot"),
            ContextRole::Secondary { cpu, .. } => format!("entry{}", cpu),
            ContextRole::Task { handle, name } if name.is_empty() => format!("task{}", handle),
            ContextRole::Task { name, .. } => name.clone(),
        }
    }

    /// Arguments passed to the entry point
    pub fn entry_args(&self) -> Vec<u32> {
        match self {
            ContextRole::Boot => Vec::new(),
            ContextRole::Secondary { cpu, idle } => vec![*cpu, *idle],
            ContextRole::Task { handle, .. } => vec![*handle],
        }
    }

    pub fn is_boot(&self) -> bool {
        matches!(self, ContextRole::Boot)
    }
}

// === Messages ===

/// A request from a running context for a new context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpawnRequest {
    /// `bringup_secondary(cpu, idle)`
    Secondary { cpu: u32, idle: u32 },
    /// `new_worker(handle, name)`
    Task { handle: u32, name: String },
}

impl From<SpawnRequest> for ContextRole {
    fn from(request: SpawnRequest) -> Self {
        match request {
            SpawnRequest::Secondary { cpu, idle } => ContextRole::Secondary { cpu, idle },
            SpawnRequest::Task { handle, name } => ContextRole::Task { handle, name },
        }
    }
}

/// Everything a context sends to the supervisor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextMessage {
    /// Launch another context
    Spawn { request: SpawnRequest },
    /// A decoded line of kernel console output
    Console { text: String },
    /// The context called `halt` and is exiting
    Halted,
    /// The kernel asked for the host to be reloaded
    Restart,
    /// The context failed outside the kernel's control
    Error { message: String },
}

/// What the supervisor hands to a newly launched context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub id: ContextId,
    pub role: ContextRole,
    /// Present for the boot context only
    pub devicetree: Option<Vec<u8>>,
}

// === Memory ===

/// Check that `[offset, offset + len)` lies inside a memory of `size` bytes.
pub fn check_range(offset: usize, len: usize, size: usize) -> Result<(), HalError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(HalError::OutOfBounds),
    }
}

/// The shared linear memory as seen from one context
///
/// Accesses are unsynchronized. The host never adds locks or fences around
/// them: ordering between contexts is the kernel's responsibility.
pub trait LinearMemory {
    /// Current size in bytes
    fn size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    ///
    /// # Returns
    /// * `Err(HalError::OutOfBounds)` - range not inside the memory; nothing is read
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), HalError>;

    /// Copy `data` into memory starting at `offset`
    ///
    /// # Returns
    /// * `Err(HalError::OutOfBounds)` - range not inside the memory; nothing is written
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), HalError>;

    fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, HalError> {
        check_range(offset, len, self.size())?;
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }
}

// === Context Side ===

/// Platform services available to one execution context
///
/// Implementations are created per context and are never shared between
/// contexts; only the memory they expose is.
pub trait ContextHal {
    type Memory: LinearMemory;

    /// The shared linear memory
    fn memory(&self) -> &Self::Memory;

    /// Milliseconds since the run's epoch, with sub-millisecond fraction
    ///
    /// All contexts of one run share the epoch.
    fn now_millis(&self) -> f64;

    /// Send a message to the supervisor (asynchronous, never blocks)
    fn post(&self, message: &ContextMessage) -> Result<(), HalError>;

    /// Best-effort textual backtrace of the current call stack
    fn capture_backtrace(&self) -> Option<String> {
        None
    }

    /// Pause for an attached debugger
    fn breakpoint(&self) {}

    /// Write a diagnostic line to the platform's log
    fn debug_write(&self, msg: &str);
}

// === Supervisor Side ===

/// Platform services used by the orchestrator
pub trait HAL {
    /// Handle to a launched context (a Web Worker in the browser)
    type ContextHandle;

    /// Start a new context: instantiate the kernel against the shared memory
    /// and call the entry point for `spec.role`
    ///
    /// # Returns
    /// * `Ok(handle)` - the context was started (it may not be running yet)
    /// * `Err(HalError::SpawnFailed)` - the platform could not create it
    fn launch(&self, spec: &LaunchSpec) -> Result<Self::ContextHandle, HalError>;

    /// Stop a context that halted
    fn terminate(&self, handle: &Self::ContextHandle);

    /// Fill `buf` from a cryptographically secure source
    ///
    /// # Returns
    /// * `Err(HalError::EntropyUnavailable)` - no secure source on this platform
    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), HalError>;

    /// Deliver kernel console output from the context labelled `source`
    fn console_output(&self, source: &str, text: &str);

    /// Reload the whole host environment (no-op where unsupported)
    fn restart(&self) {}

    /// Write a diagnostic line to the platform's log
    fn debug_write(&self, msg: &str);
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Memory range outside the linear memory
    OutOfBounds,
    /// Failed to start an execution context
    SpawnFailed,
    /// Message could not be delivered
    MessageFailed,
    /// No secure random source available
    EntropyUnavailable,
    /// Operation not supported on this platform
    NotSupported,
    /// Invalid argument
    InvalidArgument,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HalError::OutOfBounds => "memory access out of bounds",
            HalError::SpawnFailed => "failed to start execution context",
            HalError::MessageFailed => "failed to deliver message",
            HalError::EntropyUnavailable => "no secure random source",
            HalError::NotSupported => "not supported on this platform",
            HalError::InvalidArgument => "invalid argument",
        };
        f.write_str(text)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}
