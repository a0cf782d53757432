//! Boot configuration
//!
//! Handed to the supervisor as a JSON string. Every field is optional:
//!
//! ```json
//! { "cmdline": "no_hash_pointers", "memory_pages": 1024, "debug": false, "worker_url": "./worker.js" }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use lwk_hal::PAGE_SIZE;

/// Kernel command line used when none is given
pub const DEFAULT_CMDLINE: &str = "no_hash_pointers";

/// 64 MiB
pub const DEFAULT_MEMORY_PAGES: u32 = 1024;

/// Largest page count whose byte size fits one 32-bit cell in `/memory`
pub const MAX_MEMORY_PAGES: u32 = 65535;

pub const DEFAULT_WORKER_URL: &str = "./worker.js";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// Kernel command line, passed as `/chosen/bootargs`
    pub cmdline: String,
    /// Shared memory size in 64 KiB pages (initial = maximum)
    pub memory_pages: u32,
    /// Honor `breakpoint` calls
    pub debug: bool,
    /// Script each execution context runs in
    pub worker_url: String,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            cmdline: String::from(DEFAULT_CMDLINE),
            memory_pages: DEFAULT_MEMORY_PAGES,
            debug: false,
            worker_url: String::from(DEFAULT_WORKER_URL),
        }
    }
}

impl BootConfig {
    /// Parse and validate. A blank string yields the defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: BootConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_pages == 0 || self.memory_pages > MAX_MEMORY_PAGES {
            return Err(ConfigError::InvalidMemoryPages(self.memory_pages));
        }
        if self.worker_url.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerUrl);
        }
        Ok(())
    }

    /// Shared memory size in bytes
    pub fn memory_bytes(&self) -> u64 {
        self.memory_pages as u64 * PAGE_SIZE as u64
    }
}
