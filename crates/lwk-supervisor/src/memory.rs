//! Shared linear memory backed by a `WebAssembly.Memory`
//!
//! Every context wraps the same `WebAssembly.Memory` object, created with
//! `shared: true` so its buffer is a `SharedArrayBuffer`. Copies go through
//! plain `Uint8Array` views: no `Atomics`, no fences.

use js_sys::{Object, Uint8Array, WebAssembly};
use lwk_hal::{check_range, HalError, LinearMemory};
use wasm_bindgen::prelude::*;

use crate::util::set;

#[derive(Clone, Debug)]
pub struct JsLinearMemory {
    memory: WebAssembly::Memory,
}

impl JsLinearMemory {
    /// Allocate a memory of exactly `pages` pages (initial = maximum).
    pub fn allocate(pages: u32, shared: bool) -> Result<Self, JsValue> {
        let descriptor = Object::new();
        set(&descriptor, "initial", &JsValue::from(pages))?;
        set(&descriptor, "maximum", &JsValue::from(pages))?;
        set(&descriptor, "shared", &JsValue::from(shared))?;
        let memory = WebAssembly::Memory::new(&descriptor)?;
        Ok(Self { memory })
    }

    pub fn from_memory(memory: WebAssembly::Memory) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &WebAssembly::Memory {
        &self.memory
    }

    /// The buffer may be replaced if the memory grows, so views are never
    /// cached.
    fn view(&self) -> Uint8Array {
        Uint8Array::new(&self.memory.buffer())
    }
}

impl LinearMemory for JsLinearMemory {
    fn size(&self) -> usize {
        self.view().length() as usize
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), HalError> {
        let view = self.view();
        check_range(offset, buf.len(), view.length() as usize)?;
        view.subarray(offset as u32, (offset + buf.len()) as u32)
            .copy_to(buf);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), HalError> {
        let view = self.view();
        check_range(offset, data.len(), view.length() as usize)?;
        view.subarray(offset as u32, (offset + data.len()) as u32)
            .copy_from(data);
        Ok(())
    }
}
