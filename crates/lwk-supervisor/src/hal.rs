//! Main-thread HAL
//!
//! Launches one module-type Web Worker per execution context. Worker
//! messages are queued in an [`Inbox`]; queuing rings a doorbell that the
//! supervisor uses to drain the inbox into the orchestrator.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use js_sys::WebAssembly;
use lwk_hal::{ContextId, ContextMessage, HalError, LaunchSpec, HAL};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{ErrorEvent, MessageEvent, Worker, WorkerOptions, WorkerType};

use crate::context::StartMessage;
use crate::memory::JsLinearMemory;
use crate::util::{describe, log};

// === Inbox ===

/// A message received from a worker
pub enum InboxItem {
    /// Payload as posted by the context (JSON text when well-formed)
    Raw(String),
    /// Synthesized by the supervisor (worker `error` events)
    Message(ContextMessage),
}

/// Worker messages waiting for the supervisor
#[derive(Default)]
pub struct Inbox {
    items: RefCell<VecDeque<(ContextId, InboxItem)>>,
    doorbell: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Inbox {
    pub fn set_doorbell(&self, doorbell: Rc<dyn Fn()>) {
        *self.doorbell.borrow_mut() = Some(doorbell);
    }

    pub fn push(&self, source: ContextId, item: InboxItem) {
        self.items.borrow_mut().push_back((source, item));
        let doorbell = self.doorbell.borrow().clone();
        if let Some(ring) = doorbell {
            ring();
        }
    }

    pub fn pop(&self) -> Option<(ContextId, InboxItem)> {
        self.items.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === Console ===

/// Kernel console lines waiting for the page
#[derive(Default)]
pub struct ConsoleSink {
    callback: RefCell<Option<js_sys::Function>>,
    pending: RefCell<Vec<(String, String)>>,
}

impl ConsoleSink {
    pub fn set_callback(&self, callback: js_sys::Function) {
        *self.callback.borrow_mut() = Some(callback);
    }

    fn push(&self, source: &str, text: &str) {
        self.pending
            .borrow_mut()
            .push((source.to_string(), text.to_string()));
    }

    /// Deliver pending lines as `callback(text, source)`. Lines stay
    /// buffered until a callback is registered.
    ///
    /// No borrow is held while the callback runs.
    pub fn flush(&self) -> usize {
        let Some(callback) = self.callback.borrow().clone() else {
            return 0;
        };
        let lines = std::mem::take(&mut *self.pending.borrow_mut());
        let count = lines.len();
        let this = JsValue::null();
        for (source, text) in lines {
            let _ = callback.call2(&this, &JsValue::from_str(&text), &JsValue::from_str(&source));
        }
        count
    }

    pub fn buffered(&self) -> usize {
        self.pending.borrow().len()
    }
}

// === Worker Handles ===

/// A launched context's worker and its event handlers
pub struct WorkerHandle {
    id: ContextId,
    worker: Worker,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(ErrorEvent)>,
}

impl WorkerHandle {
    pub fn id(&self) -> ContextId {
        self.id
    }
}

// === WebHal ===

pub struct WebHal {
    module: WebAssembly::Module,
    memory: JsLinearMemory,
    worker_url: String,
    debug: bool,
    time_origin: f64,
    inbox: Rc<Inbox>,
    console: Rc<ConsoleSink>,
}

impl WebHal {
    pub fn new(
        module: WebAssembly::Module,
        memory: JsLinearMemory,
        worker_url: &str,
        debug: bool,
    ) -> Self {
        let time_origin = web_sys::window()
            .and_then(|w| w.performance())
            .map(|p| p.time_origin())
            .unwrap_or(0.0);
        Self {
            module,
            memory,
            worker_url: worker_url.to_string(),
            debug,
            time_origin,
            inbox: Rc::new(Inbox::default()),
            console: Rc::new(ConsoleSink::default()),
        }
    }

    pub fn inbox(&self) -> Rc<Inbox> {
        self.inbox.clone()
    }

    pub fn console(&self) -> Rc<ConsoleSink> {
        self.console.clone()
    }

    pub fn memory(&self) -> &JsLinearMemory {
        &self.memory
    }

    fn create_worker(&self, spec: &LaunchSpec) -> Result<WorkerHandle, HalError> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);
        options.set_name(&spec.role.label());

        let worker = Worker::new_with_options(&self.worker_url, &options).map_err(|e| {
            log(&format!(
                "[web-hal] Failed to create Worker for context {}: {}",
                spec.id,
                describe(&e)
            ));
            HalError::SpawnFailed
        })?;

        let id = spec.id;
        let inbox = self.inbox.clone();
        let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let payload = event.data().as_string().unwrap_or_default();
            inbox.push(id, InboxItem::Raw(payload));
        });

        let inbox = self.inbox.clone();
        let onerror = Closure::<dyn FnMut(ErrorEvent)>::new(move |event: ErrorEvent| {
            event.prevent_default();
            let message = format!(
                "{} ({}:{})",
                event.message(),
                event.filename(),
                event.lineno()
            );
            inbox.push(id, InboxItem::Message(ContextMessage::Error { message }));
        });

        worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        Ok(WorkerHandle {
            id,
            worker,
            _onmessage: onmessage,
            _onerror: onerror,
        })
    }
}

impl HAL for WebHal {
    type ContextHandle = WorkerHandle;

    fn launch(&self, spec: &LaunchSpec) -> Result<WorkerHandle, HalError> {
        let handle = self.create_worker(spec)?;

        let start = StartMessage {
            id: spec.id,
            role: spec.role.clone(),
            module: self.module.clone(),
            memory: self.memory.memory().clone(),
            devicetree: spec.devicetree.clone(),
            time_origin: self.time_origin,
            debug: self.debug,
        };
        let posted = start
            .to_js()
            .and_then(|msg| handle.worker.post_message(&msg));
        if let Err(e) = posted {
            log(&format!(
                "[web-hal] Failed to start context {}: {}",
                spec.id,
                describe(&e)
            ));
            handle.worker.terminate();
            return Err(HalError::SpawnFailed);
        }

        log(&format!(
            "[web-hal] Launched context {} ({}) in Worker",
            spec.id,
            spec.role.label()
        ));
        Ok(handle)
    }

    fn terminate(&self, handle: &WorkerHandle) {
        handle.worker.terminate();
        log(&format!("[web-hal] Terminated Worker for context {}", handle.id));
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), HalError> {
        let crypto = web_sys::window()
            .ok_or(HalError::EntropyUnavailable)?
            .crypto()
            .map_err(|_| HalError::EntropyUnavailable)?;
        crypto
            .get_random_values_with_u8_array(buf)
            .map_err(|_| HalError::EntropyUnavailable)?;
        Ok(())
    }

    fn console_output(&self, source: &str, text: &str) {
        log(&format!("[{}] {}", source, text));
        self.console.push(source, text);
    }

    fn restart(&self) {
        match web_sys::window() {
            Some(window) => {
                log("[web-hal] Restart requested, reloading page");
                let _ = window.location().reload();
            }
            None => log("[web-hal] Restart not supported here"),
        }
    }

    fn debug_write(&self, msg: &str) {
        log(msg);
    }
}
