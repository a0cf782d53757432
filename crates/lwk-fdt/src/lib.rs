//! Flattened Device Tree (FDT) support for the kernel host
//!
//! The kernel receives its hardware description exactly once, at boot, as a
//! flattened device tree blob. This crate builds that blob:
//!
//! - [`tree`] - the node/property model and its value coercions
//! - [`writer`] - [`FdtWriter`], the checked front end over `vm_fdt`
//! - [`boot`] - the fixed tree layout the host passes to the kernel
//!
//! Serialization itself (header, reservation map, aligned structure block,
//! interned strings block) is done by `vm_fdt`. This crate adds typed
//! property values, per-node duplicate checks and a size limit.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod boot;
mod error;
pub mod tree;
pub mod writer;

pub use boot::{BootInfo, RNG_SEED_LEN};
pub use error::EncodingError;
pub use tree::{DeviceTree, Node, Property, PropertyValue, Region};
pub use writer::{FdtWriter, NodeToken};

/// Default upper bound on an encoded blob
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024;
