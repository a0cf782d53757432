//! Host boot layout
//!
//! The tree handed to the kernel at boot is fixed:
//!
//! ```text
//! / {
//!     #address-cells = <1>;
//!     #size-cells = <1>;
//!     chosen {
//!         rng-seed = [64 random bytes];
//!         bootargs = "<kernel command line>";
//!     };
//!     aliases { };
//!     memory {
//!         device_type = "memory";
//!         reg = <base size>;
//!     };
//! };
//! ```
//!
//! Addresses are one cell wide, matching the 32-bit linear memory.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::EncodingError;
use crate::tree::{DeviceTree, Node, PropertyValue, Region};

/// Length of the `rng-seed` property
pub const RNG_SEED_LEN: usize = 64;

/// Address and size width of the host's memory map, in cells
const HOST_CELLS: u32 = 1;

/// Everything the host tells the kernel at boot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootInfo {
    /// Kernel command line
    pub bootargs: String,
    /// The whole linear memory
    pub memory: Region,
    /// Fresh entropy, regenerated on every boot
    pub rng_seed: [u8; RNG_SEED_LEN],
}

impl BootInfo {
    /// Memory starting at address 0 with `memory_size` bytes.
    pub fn new(bootargs: impl Into<String>, memory_size: u64, rng_seed: [u8; RNG_SEED_LEN]) -> Self {
        Self {
            bootargs: bootargs.into(),
            memory: Region::new(0, memory_size),
            rng_seed,
        }
    }

    pub fn to_tree(&self) -> DeviceTree {
        let chosen = Node::new("chosen")
            .with_property("rng-seed", PropertyValue::Bytes(self.rng_seed.to_vec()))
            .with_property("bootargs", PropertyValue::string(self.bootargs.clone()));

        let memory = Node::new("memory")
            .with_property("device_type", PropertyValue::string("memory"))
            .with_property(
                "reg",
                PropertyValue::Reg {
                    regions: vec![self.memory],
                    address_cells: HOST_CELLS,
                    size_cells: HOST_CELLS,
                },
            );

        let root = Node::root()
            .with_property("#address-cells", PropertyValue::u32(HOST_CELLS))
            .with_property("#size-cells", PropertyValue::u32(HOST_CELLS))
            .with_child(chosen)
            .with_child(Node::new("aliases"))
            .with_child(memory);

        DeviceTree::new(root)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        self.to_tree().encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_layout() {
        let info = BootInfo::new("no_hash_pointers", 1024 * 65536, [0x5a; RNG_SEED_LEN]);
        let blob = info.encode().unwrap();
        let fdt = fdt::Fdt::new(&blob).unwrap();

        let root = fdt.find_node("/").unwrap();
        let names: Vec<&str> = root.children().map(|c| c.name).collect();
        assert_eq!(names, ["chosen", "aliases", "memory"]);
        let cells = fdt.root().cell_sizes();
        assert_eq!((cells.address_cells, cells.size_cells), (1, 1));

        let chosen = fdt.find_node("/chosen").unwrap();
        assert_eq!(fdt.chosen().bootargs(), Some("no_hash_pointers"));
        assert_eq!(
            chosen.property("rng-seed").unwrap().value,
            &[0x5a; RNG_SEED_LEN][..]
        );

        let aliases = fdt.find_node("/aliases").unwrap();
        assert_eq!(aliases.properties().count(), 0);
        assert_eq!(aliases.children().count(), 0);

        let memory = fdt.find_node("/memory").unwrap();
        assert_eq!(
            memory.property("device_type").unwrap().value,
            b"memory\0"
        );
        assert_eq!(
            memory.property("reg").unwrap().value,
            [0, 0, 0, 0, 0x04, 0, 0, 0]
        );
    }

    #[test]
    fn test_memory_beyond_one_cell_fails() {
        let info = BootInfo::new("", 1 << 32, [0; RNG_SEED_LEN]);
        assert!(matches!(
            info.encode(),
            Err(EncodingError::CellOverflow { .. })
        ));
    }
}
