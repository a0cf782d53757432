//! Syscall bridge
//!
//! One [`Bridge`] per execution context implements the `kernel` import
//! namespace. It is bound to that context's [`ContextHal`] and owns the
//! context-local state: the interrupt flag, the console decoder and, for the
//! boot context, the device tree.
//!
//! Every error is logged here. The platform layer only decides, through
//! [`BridgeError::is_fatal`], whether to throw it back into the kernel.
//!
//! The bridge never synchronizes shared memory. Reads and writes go straight
//! through [`LinearMemory`]; ordering between contexts is up to the kernel.

use std::fmt;

use lwk_hal::{ContextHal, ContextId, ContextMessage, ContextRole, LinearMemory, SpawnRequest};

use crate::console::ConsoleDecoder;
use crate::error::BridgeError;
use crate::stacktrace;
use crate::time::MonotonicClock;

/// Import namespace the kernel links against
pub const IMPORT_MODULE: &str = "kernel";

/// Every call in the `kernel` import namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Syscall {
    Breakpoint,
    Halt,
    Restart,
    BootConsoleWrite,
    BootConsoleClose,
    ReturnAddress,
    SetIrqEnabled,
    GetIrqEnabled,
    GetDt,
    GetNowNsec,
    GetStacktrace,
    NewWorker,
    BringupSecondary,
}

impl Syscall {
    pub const ALL: [Syscall; 13] = [
        Syscall::Breakpoint,
        Syscall::Halt,
        Syscall::Restart,
        Syscall::BootConsoleWrite,
        Syscall::BootConsoleClose,
        Syscall::ReturnAddress,
        Syscall::SetIrqEnabled,
        Syscall::GetIrqEnabled,
        Syscall::GetDt,
        Syscall::GetNowNsec,
        Syscall::GetStacktrace,
        Syscall::NewWorker,
        Syscall::BringupSecondary,
    ];

    /// Import name
    pub fn name(self) -> &'static str {
        match self {
            Syscall::Breakpoint => "breakpoint",
            Syscall::Halt => "halt",
            Syscall::Restart => "restart",
            Syscall::BootConsoleWrite => "boot_console_write",
            Syscall::BootConsoleClose => "boot_console_close",
            Syscall::ReturnAddress => "return_address",
            Syscall::SetIrqEnabled => "set_irq_enabled",
            Syscall::GetIrqEnabled => "get_irq_enabled",
            Syscall::GetDt => "get_dt",
            Syscall::GetNowNsec => "get_now_nsec",
            Syscall::GetStacktrace => "get_stacktrace",
            Syscall::NewWorker => "new_worker",
            Syscall::BringupSecondary => "bringup_secondary",
        }
    }

    /// Calls that fill a kernel buffer; a bad range there is fatal
    pub fn writes_memory(self) -> bool {
        matches!(self, Syscall::GetDt | Syscall::GetStacktrace)
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interrupt enable flag of one context
///
/// Never shared: each bridge owns its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IrqState(i32);

impl IrqState {
    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn set(&mut self, value: i32) {
        self.0 = value;
    }
}

pub struct Bridge<H: ContextHal> {
    hal: H,
    id: ContextId,
    role: ContextRole,
    irq: IrqState,
    console: ConsoleDecoder,
    /// Boot context only
    devicetree: Option<Vec<u8>>,
    debug: bool,
    clock: MonotonicClock,
    halted: bool,
}

impl<H: ContextHal> Bridge<H> {
    pub fn new(
        hal: H,
        id: ContextId,
        role: ContextRole,
        devicetree: Option<Vec<u8>>,
        debug: bool,
    ) -> Self {
        Self {
            hal,
            id,
            role,
            irq: IrqState::default(),
            console: ConsoleDecoder::new(),
            devicetree,
            debug,
            clock: MonotonicClock::new(),
            halted: false,
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn role(&self) -> &ContextRole {
        &self.role
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    // === Control ===

    /// Pause in the platform debugger when running with `debug`
    pub fn breakpoint(&mut self) {
        if self.debug {
            self.log("breakpoint");
            self.hal.breakpoint();
        }
    }

    /// Flush the console and tell the supervisor this context is done.
    ///
    /// The caller must stop running kernel code afterwards.
    pub fn halt(&mut self) -> Result<(), BridgeError> {
        self.flush_console(Syscall::Halt)?;
        self.halted = true;
        self.post(Syscall::Halt, &ContextMessage::Halted)
    }

    /// Ask the supervisor to reload the host
    pub fn restart(&mut self) -> Result<(), BridgeError> {
        self.flush_console(Syscall::Restart)?;
        self.post(Syscall::Restart, &ContextMessage::Restart)
    }

    /// The entry export stopped running, by returning or by trapping.
    ///
    /// Pending console text is delivered either way. An entry that returns
    /// without calling `halt` counts as a halt.
    pub fn entry_finished(&mut self, trapped: bool) -> Result<(), BridgeError> {
        if self.halted {
            return Ok(());
        }
        if trapped {
            self.log("kernel trapped");
            return self.flush_console(Syscall::Halt);
        }
        self.halt()
    }

    // === Console ===

    pub fn boot_console_write(&mut self, offset: u32, len: u32) -> Result<(), BridgeError> {
        let bytes = self.read(Syscall::BootConsoleWrite, offset, len)?;
        for text in self.console.push(&bytes) {
            self.post(Syscall::BootConsoleWrite, &ContextMessage::Console { text })?;
        }
        Ok(())
    }

    pub fn boot_console_close(&mut self) -> Result<(), BridgeError> {
        self.log("console closed");
        self.flush_console(Syscall::BootConsoleClose)
    }

    // === Introspection ===

    /// Stack walking is disabled
    pub fn return_address(&self, _level: i32) -> i32 {
        0
    }

    pub fn set_irq_enabled(&mut self, enabled: i32) {
        self.irq.set(enabled);
    }

    pub fn get_irq_enabled(&self) -> i32 {
        self.irq.get()
    }

    /// Copy the device tree to `offset`.
    ///
    /// # Returns
    /// * `Err(ProtocolViolation)` - not the boot context; nothing written
    /// * `Err(Truncation)` - `capacity` smaller than the blob; nothing written
    /// * `Err(OutOfBounds)` - destination outside shared memory; nothing written
    pub fn get_dt(&mut self, offset: u32, capacity: u32) -> Result<(), BridgeError> {
        let blob = match (&self.role, &self.devicetree) {
            (ContextRole::Boot, Some(blob)) => blob,
            _ => {
                return Err(self.fail(BridgeError::ProtocolViolation {
                    call: Syscall::GetDt,
                    context: self.id,
                }))
            }
        };
        if (capacity as usize) < blob.len() {
            let needed = blob.len();
            return Err(self.fail(BridgeError::Truncation {
                needed,
                capacity: capacity as usize,
            }));
        }
        if self.hal.memory().write(offset as usize, blob).is_err() {
            let len = blob.len() as u32;
            return Err(self.fail(BridgeError::OutOfBounds {
                call: Syscall::GetDt,
                offset,
                len,
            }));
        }
        Ok(())
    }

    /// Nanoseconds since the run's epoch, in 5 µs steps, never decreasing
    pub fn get_now_nsec(&mut self) -> u64 {
        let millis = self.hal.now_millis();
        self.clock.observe(millis)
    }

    /// Write a best-effort backtrace of at most `capacity` bytes to `offset`.
    ///
    /// Writes nothing when the platform has no backtrace.
    pub fn get_stacktrace(&mut self, offset: u32, capacity: u32) -> Result<(), BridgeError> {
        let trace = match self.hal.capture_backtrace() {
            Some(trace) => stacktrace::trim_host_frames(&trace),
            None => return Ok(()),
        };
        let out = stacktrace::fit_to_capacity(trace.as_bytes(), capacity as usize);
        if self.hal.memory().write(offset as usize, &out).is_err() {
            return Err(self.fail(BridgeError::OutOfBounds {
                call: Syscall::GetStacktrace,
                offset,
                len: out.len() as u32,
            }));
        }
        Ok(())
    }

    // === Spawning ===

    /// Request a task context. Returns before the context starts.
    pub fn new_worker(&mut self, task: u32, name_ptr: u32, name_len: u32) -> Result<(), BridgeError> {
        let name = self.read(Syscall::NewWorker, name_ptr, name_len)?;
        let name = String::from_utf8_lossy(&name).into_owned();
        let request = SpawnRequest::Task { handle: task, name };
        self.post(Syscall::NewWorker, &ContextMessage::Spawn { request })
    }

    /// Request a secondary CPU context. Returns before the context starts.
    pub fn bringup_secondary(&mut self, cpu: u32, idle: u32) -> Result<(), BridgeError> {
        let request = SpawnRequest::Secondary { cpu, idle };
        self.post(Syscall::BringupSecondary, &ContextMessage::Spawn { request })
    }

    // === Helpers ===

    fn read(&self, call: Syscall, offset: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        self.hal
            .memory()
            .read_vec(offset as usize, len as usize)
            .map_err(|_| self.fail(BridgeError::OutOfBounds { call, offset, len }))
    }

    fn post(&self, call: Syscall, message: &ContextMessage) -> Result<(), BridgeError> {
        self.hal
            .post(message)
            .map_err(|error| self.fail(BridgeError::Hal { call, error }))
    }

    fn flush_console(&mut self, call: Syscall) -> Result<(), BridgeError> {
        match self.console.flush() {
            Some(text) => self.post(call, &ContextMessage::Console { text }),
            None => Ok(()),
        }
    }

    fn fail(&self, error: BridgeError) -> BridgeError {
        let severity = if error.is_fatal() { "fatal" } else { "error" };
        self.log(&format!("{}: {}", severity, error));
        error
    }

    fn log(&self, msg: &str) {
        self.hal
            .debug_write(&format!("[bridge] {} ({}): {}", self.id, self.role.label(), msg));
    }
}
