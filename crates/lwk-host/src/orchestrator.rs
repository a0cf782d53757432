//! Bootstrap orchestrator
//!
//! Owns the run: boots context 0 with the device tree, then turns spawn
//! requests from any context into new contexts. Requests go through one
//! FIFO queue drained by [`Orchestrator::pump`], so a chain of contexts
//! spawning contexts never recurses.

use std::collections::{BTreeMap, VecDeque};

use lwk_fdt::RNG_SEED_LEN;
use lwk_hal::{ContextId, ContextMessage, ContextRole, HalError, LaunchSpec, SpawnRequest, HAL};

use crate::config::BootConfig;
use crate::devicetree::build_boot_blob;
use crate::error::{BootError, ConfigError};
use crate::protocol::decode_message;

/// Lifecycle of one context as seen by the supervisor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// Launched; may still be starting up
    Running,
    /// Called `halt`
    Halted,
    /// Died without halting
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextRecord {
    pub id: ContextId,
    pub role: ContextRole,
    pub state: ContextState,
    /// Context whose request created this one (`None` for boot)
    pub parent: Option<ContextId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Contexts started, boot included
    pub launched: usize,
    pub halted: usize,
    /// Spawn requests the platform could not start
    pub failed_launches: usize,
    /// Undecodable messages
    pub dropped: usize,
}

pub struct Orchestrator<H: HAL> {
    hal: H,
    config: BootConfig,
    contexts: BTreeMap<ContextId, ContextRecord>,
    handles: BTreeMap<ContextId, H::ContextHandle>,
    /// Spawn requests with the context that sent them
    queue: VecDeque<(ContextId, SpawnRequest)>,
    next_id: u32,
    booted: bool,
    stats: OrchestratorStats,
}

impl<H: HAL> Orchestrator<H> {
    pub fn new(hal: H, config: BootConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            hal,
            config,
            contexts: BTreeMap::new(),
            handles: BTreeMap::new(),
            queue: VecDeque::new(),
            next_id: ContextId::BOOT.0,
            booted: false,
            stats: OrchestratorStats::default(),
        })
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Generate the device tree and start the boot context.
    ///
    /// Every boot draws a fresh `rng-seed`. Nothing is launched if the tree
    /// cannot be built.
    pub fn boot(&mut self) -> Result<ContextId, BootError> {
        if self.booted {
            return Err(BootError::AlreadyBooted);
        }

        let mut seed = [0u8; RNG_SEED_LEN];
        self.hal.random_bytes(&mut seed).map_err(BootError::Entropy)?;
        let blob = build_boot_blob(&self.config, seed)?;

        self.hal.debug_write(&format!(
            "[orchestrator] Booting: {} pages, cmdline {:?}, device tree {} bytes",
            self.config.memory_pages,
            self.config.cmdline,
            blob.len()
        ));

        let id = self
            .launch(ContextRole::Boot, None, Some(blob))
            .map_err(BootError::Launch)?;
        self.booted = true;
        Ok(id)
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    /// Handle one message from context `source`.
    pub fn handle_message(&mut self, source: ContextId, message: ContextMessage) {
        match message {
            ContextMessage::Spawn { request } => {
                self.queue.push_back((source, request));
            }
            ContextMessage::Console { text } => {
                let label = self.label(source);
                self.hal.console_output(&label, &text);
            }
            ContextMessage::Halted => {
                self.hal.debug_write(&format!(
                    "[orchestrator] Context {} ({}) halted",
                    source,
                    self.label(source)
                ));
                if self.finish(source, ContextState::Halted) {
                    self.stats.halted += 1;
                }
            }
            ContextMessage::Restart => {
                self.hal.debug_write(&format!(
                    "[orchestrator] Restart requested by context {}",
                    source
                ));
                self.hal.restart();
            }
            ContextMessage::Error { message } => {
                self.hal.debug_write(&format!(
                    "[orchestrator] Context {} ({}) failed: {}",
                    source,
                    self.label(source),
                    message
                ));
                self.finish(source, ContextState::Failed);
            }
        }
    }

    /// Decode and handle a JSON message. Undecodable payloads are counted
    /// and dropped.
    ///
    /// Returns whether the payload was recognized.
    pub fn handle_raw(&mut self, source: ContextId, payload: &str) -> bool {
        match decode_message(payload) {
            Ok(message) => {
                self.handle_message(source, message);
                true
            }
            Err(_) => {
                self.stats.dropped += 1;
                false
            }
        }
    }

    /// Launch a context for every queued spawn request, oldest first.
    ///
    /// Returns the number of contexts started. Failed launches are logged
    /// and not retried.
    pub fn pump(&mut self) -> usize {
        let mut launched = 0;
        while let Some((source, request)) = self.queue.pop_front() {
            let role = ContextRole::from(request);
            let label = role.label();
            match self.launch(role, Some(source), None) {
                Ok(_) => launched += 1,
                Err(e) => {
                    self.stats.failed_launches += 1;
                    self.hal.debug_write(&format!(
                        "[orchestrator] Failed to launch {} for context {}: {}",
                        label, source, e
                    ));
                }
            }
        }
        launched
    }

    /// Spawn requests waiting for [`pump`](Self::pump)
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn context(&self, id: ContextId) -> Option<&ContextRecord> {
        self.contexts.get(&id)
    }

    /// All contexts ever launched, by id
    pub fn contexts(&self) -> impl Iterator<Item = &ContextRecord> {
        self.contexts.values()
    }

    pub fn running_count(&self) -> usize {
        self.contexts
            .values()
            .filter(|c| c.state == ContextState::Running)
            .count()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    fn launch(
        &mut self,
        role: ContextRole,
        parent: Option<ContextId>,
        devicetree: Option<Vec<u8>>,
    ) -> Result<ContextId, HalError> {
        let id = ContextId(self.next_id);
        let spec = LaunchSpec {
            id,
            role,
            devicetree,
        };
        let handle = self.hal.launch(&spec)?;
        self.next_id += 1;
        self.stats.launched += 1;
        self.handles.insert(id, handle);
        self.contexts.insert(
            id,
            ContextRecord {
                id,
                role: spec.role,
                state: ContextState::Running,
                parent,
            },
        );
        Ok(id)
    }

    /// Move a running context to `state` and release its platform handle.
    fn finish(&mut self, id: ContextId, state: ContextState) -> bool {
        match self.contexts.get_mut(&id) {
            Some(record) if record.state == ContextState::Running => {
                record.state = state;
                if let Some(handle) = self.handles.remove(&id) {
                    self.hal.terminate(&handle);
                }
                true
            }
            _ => false,
        }
    }

    fn label(&self, id: ContextId) -> String {
        self.contexts
            .get(&id)
            .map(|c| c.role.label())
            .unwrap_or_else(|| format!("context{}", id))
    }
}
