//! Host error types

use std::fmt;

use lwk_fdt::EncodingError;
use lwk_hal::{ContextId, HalError};

use crate::bridge::Syscall;

/// Invalid boot configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Page count outside 1..=65535
    InvalidMemoryPages(u32),
    /// No URL to load the context runtime from
    EmptyWorkerUrl,
    /// Malformed configuration JSON
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidMemoryPages(pages) => {
                write!(f, "memory_pages must be in 1..=65535, got {}", pages)
            }
            ConfigError::EmptyWorkerUrl => write!(f, "worker_url must not be empty"),
            ConfigError::Parse(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A kernel call that could not be completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeError {
    /// Kernel passed a range outside the shared memory
    OutOfBounds { call: Syscall, offset: u32, len: u32 },
    /// Destination buffer too small for the device tree
    Truncation { needed: usize, capacity: usize },
    /// Call not allowed from this context
    ProtocolViolation { call: Syscall, context: ContextId },
    /// Platform failure (message delivery, memory)
    Hal { call: Syscall, error: HalError },
}

impl BridgeError {
    /// Fatal errors are thrown into the kernel; the rest are logged and the
    /// call returns normally.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::OutOfBounds { call, .. } => call.writes_memory(),
            BridgeError::Truncation { .. } => true,
            BridgeError::ProtocolViolation { .. } => false,
            BridgeError::Hal { .. } => false,
        }
    }

    pub fn call(&self) -> Option<Syscall> {
        match self {
            BridgeError::OutOfBounds { call, .. }
            | BridgeError::ProtocolViolation { call, .. }
            | BridgeError::Hal { call, .. } => Some(*call),
            BridgeError::Truncation { .. } => Some(Syscall::GetDt),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::OutOfBounds { call, offset, len } => write!(
                f,
                "{}: range {:#x}+{:#x} outside shared memory",
                call, offset, len
            ),
            BridgeError::Truncation { needed, capacity } => write!(
                f,
                "get_dt: buffer of {} bytes cannot hold {} byte device tree",
                capacity, needed
            ),
            BridgeError::ProtocolViolation { call, context } => {
                write!(f, "{}: not permitted from context {}", call, context)
            }
            BridgeError::Hal { call, error } => write!(f, "{}: {}", call, error),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Boot aborted before or while starting the boot context
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootError {
    Config(ConfigError),
    /// Device tree could not be encoded
    Encoding(EncodingError),
    /// Encoded device tree could not be parsed back
    Decode(String),
    /// Encoded device tree decoded to different content
    SelfCheck(&'static str),
    /// No seed for `rng-seed`
    Entropy(HalError),
    /// Boot context could not be started
    Launch(HalError),
    AlreadyBooted,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Config(e) => write!(f, "configuration: {}", e),
            BootError::Encoding(e) => write!(f, "device tree encoding: {}", e),
            BootError::Decode(e) => write!(f, "device tree self-check: {}", e),
            BootError::SelfCheck(what) => write!(f, "device tree self-check: {} mismatch", what),
            BootError::Entropy(e) => write!(f, "rng-seed: {}", e),
            BootError::Launch(e) => write!(f, "boot context: {}", e),
            BootError::AlreadyBooted => write!(f, "already booted"),
        }
    }
}

impl std::error::Error for BootError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootError::Config(e) => Some(e),
            BootError::Encoding(e) => Some(e),
            BootError::Entropy(e) | BootError::Launch(e) => Some(e),
            BootError::Decode(_) | BootError::SelfCheck(_) | BootError::AlreadyBooted => None,
        }
    }
}

impl From<ConfigError> for BootError {
    fn from(e: ConfigError) -> Self {
        BootError::Config(e)
    }
}

impl From<EncodingError> for BootError {
    fn from(e: EncodingError) -> Self {
        BootError::Encoding(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        let oob = |call| BridgeError::OutOfBounds {
            call,
            offset: 0,
            len: 1,
        };
        assert!(oob(Syscall::GetDt).is_fatal());
        assert!(oob(Syscall::GetStacktrace).is_fatal());
        assert!(!oob(Syscall::BootConsoleWrite).is_fatal());
        assert!(!oob(Syscall::NewWorker).is_fatal());

        assert!(BridgeError::Truncation {
            needed: 10,
            capacity: 4
        }
        .is_fatal());
        assert!(!BridgeError::ProtocolViolation {
            call: Syscall::GetDt,
            context: ContextId(3)
        }
        .is_fatal());
    }

    #[test]
    fn test_display() {
        let e = BridgeError::ProtocolViolation {
            call: Syscall::GetDt,
            context: ContextId(3),
        };
        assert_eq!(e.to_string(), "get_dt: not permitted from context 3");

        let e = BootError::from(ConfigError::InvalidMemoryPages(0));
        assert_eq!(
            e.to_string(),
            "configuration: memory_pages must be in 1..=65535, got 0"
        );
    }
}
