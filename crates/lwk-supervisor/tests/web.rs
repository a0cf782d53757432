//! Browser-side tests (`wasm-pack test --node` or `--headless --firefox`)

#![cfg(target_arch = "wasm32")]

use js_sys::{Uint8Array, WebAssembly};
use lwk_hal::{ContextId, ContextRole, HalError, LinearMemory};
use lwk_supervisor::{Inbox, InboxItem, JsLinearMemory, StartMessage};
use std::cell::Cell;
use std::rc::Rc;
use wasm_bindgen_test::*;

/// The smallest valid module: magic and version
const EMPTY_MODULE: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

fn empty_module() -> WebAssembly::Module {
    WebAssembly::Module::new(&Uint8Array::from(&EMPTY_MODULE[..])).unwrap()
}

#[wasm_bindgen_test]
fn test_memory_read_write() {
    let memory = JsLinearMemory::allocate(2, false).unwrap();
    assert_eq!(memory.size(), 2 * 65536);

    memory.write(100, &[0xAB]).unwrap();
    assert_eq!(memory.read_vec(100, 1).unwrap(), vec![0xAB]);
}

#[wasm_bindgen_test]
fn test_memory_views_share_bytes() {
    let a = JsLinearMemory::allocate(1, false).unwrap();
    let b = JsLinearMemory::from_memory(a.memory().clone());
    a.write(100, &[0xAB]).unwrap();
    let mut seen = [0u8];
    b.read(100, &mut seen).unwrap();
    assert_eq!(seen, [0xAB]);
}

#[wasm_bindgen_test]
fn test_memory_bounds() {
    let memory = JsLinearMemory::allocate(1, false).unwrap();
    assert_eq!(memory.write(65535, &[1, 2]), Err(HalError::OutOfBounds));
    let mut buf = [0u8; 4];
    assert_eq!(memory.read(65534, &mut buf), Err(HalError::OutOfBounds));
    assert_eq!(memory.read_vec(65534, 2).unwrap(), vec![0, 0]);
}

#[wasm_bindgen_test]
fn test_start_message_round_trip() {
    let start = StartMessage {
        id: ContextId(3),
        role: ContextRole::Task {
            handle: 7,
            name: "worker-a".into(),
        },
        module: empty_module(),
        memory: JsLinearMemory::allocate(1, false).unwrap().memory().clone(),
        devicetree: None,
        time_origin: 1234.5,
        debug: true,
    };

    let decoded = StartMessage::from_js(&start.to_js().unwrap()).unwrap();
    assert_eq!(decoded.id, ContextId(3));
    assert_eq!(decoded.role, start.role);
    assert_eq!(decoded.devicetree, None);
    assert_eq!(decoded.time_origin, 1234.5);
    assert!(decoded.debug);
}

#[wasm_bindgen_test]
fn test_start_message_carries_devicetree() {
    let start = StartMessage {
        id: ContextId::BOOT,
        role: ContextRole::Boot,
        module: empty_module(),
        memory: JsLinearMemory::allocate(1, false).unwrap().memory().clone(),
        devicetree: Some(vec![0xd0, 0x0d, 0xfe, 0xed]),
        time_origin: 0.0,
        debug: false,
    };
    let decoded = StartMessage::from_js(&start.to_js().unwrap()).unwrap();
    assert_eq!(decoded.devicetree, Some(vec![0xd0, 0x0d, 0xfe, 0xed]));
}

#[wasm_bindgen_test]
fn test_inbox_rings_doorbell() {
    let inbox = Inbox::default();
    let rings = Rc::new(Cell::new(0));
    let counter = rings.clone();
    inbox.set_doorbell(Rc::new(move || counter.set(counter.get() + 1)));

    inbox.push(ContextId(1), InboxItem::Raw("{\"type\":\"halted\"}".into()));
    inbox.push(ContextId(2), InboxItem::Raw(String::new()));
    assert_eq!(rings.get(), 2);
    assert_eq!(inbox.len(), 2);

    let (source, _) = inbox.pop().unwrap();
    assert_eq!(source, ContextId(1));
    assert_eq!(inbox.len(), 1);
}
