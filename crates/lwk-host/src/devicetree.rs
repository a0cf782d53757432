//! Boot device tree generation

use fdt::Fdt;
use lwk_fdt::{BootInfo, RNG_SEED_LEN};

use crate::config::BootConfig;
use crate::error::BootError;

/// Encode the boot tree for `config` and check it parses back to the same
/// command line, seed and memory size.
pub fn build_boot_blob(config: &BootConfig, rng_seed: [u8; RNG_SEED_LEN]) -> Result<Vec<u8>, BootError> {
    config.validate()?;
    let info = BootInfo::new(config.cmdline.as_str(), config.memory_bytes(), rng_seed);
    let blob = info.encode()?;
    self_check(&info, &blob)?;
    Ok(blob)
}

fn self_check(info: &BootInfo, blob: &[u8]) -> Result<(), BootError> {
    let fdt = Fdt::new(blob).map_err(|e| BootError::Decode(e.to_string()))?;
    if fdt.total_size() != blob.len() {
        return Err(BootError::SelfCheck("totalsize"));
    }

    let chosen = fdt
        .find_node("/chosen")
        .ok_or(BootError::SelfCheck("/chosen"))?;
    let mut bootargs = info.bootargs.as_bytes().to_vec();
    bootargs.push(0);
    if chosen.property("bootargs").map(|p| p.value) != Some(&bootargs[..]) {
        return Err(BootError::SelfCheck("bootargs"));
    }
    if chosen.property("rng-seed").map(|p| p.value) != Some(&info.rng_seed[..]) {
        return Err(BootError::SelfCheck("rng-seed"));
    }

    let memory = fdt
        .find_node("/memory")
        .ok_or(BootError::SelfCheck("/memory"))?;
    let mut reg = Vec::with_capacity(8);
    reg.extend_from_slice(&(info.memory.base as u32).to_be_bytes());
    reg.extend_from_slice(&(info.memory.size as u32).to_be_bytes());
    if memory.property("reg").map(|p| p.value) != Some(&reg[..]) {
        return Err(BootError::SelfCheck("reg"));
    }
    Ok(())
}
