//! Main-thread supervisor
//!
//! [`start`] compiles the kernel once, allocates the shared memory and boots
//! context 0. From then on every worker message rings the inbox doorbell,
//! which schedules a drain: messages go to the orchestrator, queued spawn
//! requests become new workers, console lines go to the page.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use js_sys::{Uint8Array, WebAssembly};
use lwk_host::{BootConfig, Orchestrator};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::hal::{ConsoleSink, Inbox, InboxItem, WebHal};
use crate::memory::JsLinearMemory;
use crate::util::{js_error, log};

type SharedOrchestrator = Rc<RefCell<Orchestrator<WebHal>>>;

/// Handle to a running host, returned by [`start`]
#[wasm_bindgen]
pub struct Supervisor {
    orchestrator: SharedOrchestrator,
    inbox: Rc<Inbox>,
    console: Rc<ConsoleSink>,
}

/// Compile `kernel` and boot it with the JSON configuration `config`.
///
/// Resolves once the boot context has been launched.
#[wasm_bindgen]
pub async fn start(config: String, kernel: Vec<u8>) -> Result<Supervisor, JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let config = BootConfig::from_json(&config).map_err(|e| js_error(&e.to_string()))?;
    log(&format!(
        "[supervisor] Starting: {} pages, cmdline {:?}, kernel {} bytes",
        config.memory_pages,
        config.cmdline,
        kernel.len()
    ));

    let memory = JsLinearMemory::allocate(config.memory_pages, true)?;
    let bytes = Uint8Array::from(&kernel[..]);
    let module = JsFuture::from(WebAssembly::compile(&bytes))
        .await?
        .dyn_into::<WebAssembly::Module>()?;

    let hal = WebHal::new(module, memory, &config.worker_url, config.debug);
    let inbox = hal.inbox();
    let console = hal.console();

    let mut orchestrator =
        Orchestrator::new(hal, config).map_err(|e| js_error(&e.to_string()))?;
    orchestrator
        .boot()
        .map_err(|e| js_error(&format!("boot failed: {}", e)))?;

    let supervisor = Supervisor {
        orchestrator: Rc::new(RefCell::new(orchestrator)),
        inbox,
        console,
    };
    supervisor.install_doorbell();
    log("[supervisor] Boot context launched");
    Ok(supervisor)
}

#[wasm_bindgen]
impl Supervisor {
    /// Process queued worker messages and launch requested contexts.
    ///
    /// Returns the number of messages handled. Normally driven by worker
    /// messages; exposed for pages that want to drive it themselves.
    pub fn poll(&self) -> usize {
        service(&self.orchestrator, &self.inbox, &self.console)
    }

    /// Receive kernel console output as `callback(text, source)`.
    ///
    /// Output produced before a callback was set is delivered now.
    pub fn set_console_callback(&self, callback: js_sys::Function) {
        let buffered = self.console.buffered();
        self.console.set_callback(callback);
        self.console.flush();
        log(&format!(
            "[supervisor] Console callback set, flushed {} buffered lines",
            buffered
        ));
    }

    /// Contexts launched so far, boot included
    pub fn context_count(&self) -> usize {
        self.orchestrator
            .try_borrow()
            .map(|o| o.contexts().count())
            .unwrap_or(0)
    }

    /// Contexts launched and not yet halted or failed
    pub fn running_count(&self) -> usize {
        self.orchestrator
            .try_borrow()
            .map(|o| o.running_count())
            .unwrap_or(0)
    }

    /// Worker messages not yet handled
    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    /// The shared `WebAssembly.Memory`
    pub fn memory(&self) -> Result<WebAssembly::Memory, JsValue> {
        let orchestrator = self
            .orchestrator
            .try_borrow()
            .map_err(|_| js_error("supervisor busy"))?;
        Ok(orchestrator.hal().memory().memory().clone())
    }
}

impl Supervisor {
    /// Drain the inbox on a fresh task whenever a worker message arrives.
    fn install_doorbell(&self) {
        let orchestrator: Weak<RefCell<Orchestrator<WebHal>>> = Rc::downgrade(&self.orchestrator);
        let inbox = Rc::downgrade(&self.inbox);
        let console = Rc::downgrade(&self.console);
        self.inbox.set_doorbell(Rc::new(move || {
            let (orchestrator, inbox, console) = (orchestrator.clone(), inbox.clone(), console.clone());
            wasm_bindgen_futures::spawn_local(async move {
                if let (Some(o), Some(i), Some(c)) =
                    (orchestrator.upgrade(), inbox.upgrade(), console.upgrade())
                {
                    service(&o, &i, &c);
                }
            });
        }));
    }
}

/// Feed every inbox item to the orchestrator, launch what it queued, then
/// deliver console output.
fn service(orchestrator: &SharedOrchestrator, inbox: &Inbox, console: &ConsoleSink) -> usize {
    let mut handled = 0;
    {
        let Ok(mut orchestrator) = orchestrator.try_borrow_mut() else {
            // a drain is already running and will pick these up
            return 0;
        };
        while let Some((source, item)) = inbox.pop() {
            match item {
                InboxItem::Raw(payload) => {
                    orchestrator.handle_raw(source, &payload);
                }
                InboxItem::Message(message) => orchestrator.handle_message(source, message),
            }
            handled += 1;
            orchestrator.pump();
        }
    }
    console.flush();
    handled
}
