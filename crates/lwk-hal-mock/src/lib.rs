//! Mock platform for testing the kernel host
//!
//! Provides in-process implementations of [`HAL`], [`ContextHal`] and
//! [`LinearMemory`] so the bridge and the orchestrator can be exercised
//! without a browser.

#![no_std]
extern crate alloc;

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use lwk_hal::{
    check_range, ContextHal, ContextMessage, HalError, LaunchSpec, LinearMemory, HAL, PAGE_SIZE,
};

// === Memory ===

/// Shared byte arena standing in for a shared `WebAssembly.Memory`
///
/// Clones refer to the same bytes, so a clone handed to each mock context
/// behaves like the one memory every worker sees. Bytes are relaxed atomics:
/// no ordering is implied between them.
#[derive(Clone)]
pub struct MockMemory {
    bytes: Arc<[AtomicU8]>,
}

impl MockMemory {
    /// Memory of `pages` WebAssembly pages, zero-filled
    pub fn with_pages(pages: usize) -> Self {
        Self::with_size(pages * PAGE_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        let bytes: Box<[AtomicU8]> = (0..size).map(|_| AtomicU8::new(0)).collect();
        Self {
            bytes: Arc::from(bytes),
        }
    }

    /// True if both handles share the same arena
    pub fn same_arena(&self, other: &MockMemory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl LinearMemory for MockMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), HalError> {
        check_range(offset, buf.len(), self.size())?;
        for (dst, src) in buf.iter_mut().zip(&self.bytes[offset..]) {
            *dst = src.load(Ordering::Relaxed);
        }
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), HalError> {
        check_range(offset, data.len(), self.size())?;
        for (dst, src) in self.bytes[offset..].iter().zip(data) {
            dst.store(*src, Ordering::Relaxed);
        }
        Ok(())
    }
}

// === Context ===

/// Mock execution context
///
/// Records every message the bridge posts and lets tests drive the clock.
pub struct MockContextHal {
    memory: MockMemory,
    /// Simulated milliseconds since the run's epoch
    now: Cell<f64>,
    posted: RefCell<Vec<ContextMessage>>,
    debug_log: RefCell<Vec<String>>,
    backtrace: RefCell<Option<String>>,
    breakpoints: Cell<usize>,
    fail_posts: Cell<bool>,
}

impl MockContextHal {
    pub fn new(memory: MockMemory) -> Self {
        Self {
            memory,
            now: Cell::new(0.0),
            posted: RefCell::new(Vec::new()),
            debug_log: RefCell::new(Vec::new()),
            backtrace: RefCell::new(None),
            breakpoints: Cell::new(0),
            fail_posts: Cell::new(false),
        }
    }

    /// Set the simulated clock, in milliseconds
    pub fn set_millis(&self, millis: f64) {
        self.now.set(millis);
    }

    pub fn advance_millis(&self, millis: f64) {
        self.now.set(self.now.get() + millis);
    }

    /// Backtrace returned by `capture_backtrace`
    pub fn set_backtrace(&self, trace: Option<&str>) {
        *self.backtrace.borrow_mut() = trace.map(String::from);
    }

    /// Make every subsequent `post` fail
    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.set(fail);
    }

    /// Messages posted so far
    pub fn posted(&self) -> Vec<ContextMessage> {
        self.posted.borrow().clone()
    }

    /// Remove and return the messages posted so far
    pub fn take_posted(&self) -> Vec<ContextMessage> {
        core::mem::take(&mut *self.posted.borrow_mut())
    }

    /// Text of every console message posted so far
    pub fn console_lines(&self) -> Vec<String> {
        self.posted
            .borrow()
            .iter()
            .filter_map(|m| match m {
                ContextMessage::Console { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.get()
    }

    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log.borrow().iter().any(|msg| msg.contains(substr))
    }
}

impl ContextHal for MockContextHal {
    type Memory = MockMemory;

    fn memory(&self) -> &MockMemory {
        &self.memory
    }

    fn now_millis(&self) -> f64 {
        self.now.get()
    }

    fn post(&self, message: &ContextMessage) -> Result<(), HalError> {
        if self.fail_posts.get() {
            return Err(HalError::MessageFailed);
        }
        self.posted.borrow_mut().push(message.clone());
        Ok(())
    }

    fn capture_backtrace(&self) -> Option<String> {
        self.backtrace.borrow().clone()
    }

    fn breakpoint(&self) {
        self.breakpoints.set(self.breakpoints.get() + 1);
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }
}

// === Supervisor ===

/// Mock supervisor platform
///
/// Launching a context only records the [`LaunchSpec`]; tests feed the
/// resulting messages back into the orchestrator themselves.
pub struct MockHal {
    next_handle: AtomicU64,
    /// Random seed for deterministic testing
    random_seed: AtomicU64,
    entropy_available: Cell<bool>,
    fail_launches: Cell<bool>,
    launches: RefCell<Vec<LaunchSpec>>,
    terminated: RefCell<Vec<u64>>,
    console: RefCell<Vec<(String, String)>>,
    restarts: Cell<usize>,
    debug_log: RefCell<Vec<String>>,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            random_seed: AtomicU64::new(12345),
            entropy_available: Cell::new(true),
            fail_launches: Cell::new(false),
            launches: RefCell::new(Vec::new()),
            terminated: RefCell::new(Vec::new()),
            console: RefCell::new(Vec::new()),
            restarts: Cell::new(0),
            debug_log: RefCell::new(Vec::new()),
        }
    }

    pub fn set_random_seed(&self, seed: u64) {
        self.random_seed.store(seed, Ordering::SeqCst);
    }

    /// Simulate a platform with no secure random source
    pub fn set_entropy_available(&self, available: bool) {
        self.entropy_available.set(available);
    }

    /// Make every subsequent `launch` fail
    pub fn fail_launches(&self, fail: bool) {
        self.fail_launches.set(fail);
    }

    /// Every context launched so far, in launch order
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.borrow().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.borrow().len()
    }

    /// Handles passed to `terminate`
    pub fn terminated(&self) -> Vec<u64> {
        self.terminated.borrow().clone()
    }

    /// Console output as `(source, text)` pairs
    pub fn console(&self) -> Vec<(String, String)> {
        self.console.borrow().clone()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.get()
    }

    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log.borrow().iter().any(|msg| msg.contains(substr))
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HAL for MockHal {
    type ContextHandle = u64;

    fn launch(&self, spec: &LaunchSpec) -> Result<u64, HalError> {
        if self.fail_launches.get() {
            return Err(HalError::SpawnFailed);
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.debug_log.borrow_mut().push(format!(
            "[mock-hal] Launched context {} ({}) as handle {}",
            spec.id,
            spec.role.label(),
            handle
        ));
        self.launches.borrow_mut().push(spec.clone());
        Ok(handle)
    }

    fn terminate(&self, handle: &u64) {
        self.terminated.borrow_mut().push(*handle);
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), HalError> {
        if !self.entropy_available.get() {
            return Err(HalError::EntropyUnavailable);
        }
        // xorshift64, deterministic per seed
        let mut state = self.random_seed.load(Ordering::SeqCst).max(1);
        for byte in buf.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = state as u8;
        }
        self.random_seed.store(state, Ordering::SeqCst);
        Ok(())
    }

    fn console_output(&self, source: &str, text: &str) {
        self.console
            .borrow_mut()
            .push((String::from(source), String::from(text)));
    }

    fn restart(&self) {
        self.restarts.set(self.restarts.get() + 1);
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }
}
