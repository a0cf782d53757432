//! Worker-side context runtime
//!
//! Each Web Worker runs one execution context:
//!
//! 1. `worker.js` loads this crate and hands the first message it receives
//!    to [`context_main`]
//! 2. the start message carries the compiled kernel, the shared memory and
//!    the context's role
//! 3. the kernel is instantiated against `env.memory` and the `kernel`
//!    import namespace, then the role's entry export is called
//!
//! Kernel calls land in a [`Bridge`] owned by this worker. Fatal bridge
//! errors are thrown back into the kernel. `halt` throws a halt signal that
//! unwinds the kernel stack and ends the context cleanly.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Uint8Array, WebAssembly};
use lwk_hal::{ContextHal, ContextId, ContextMessage, ContextRole, HalError};
use lwk_host::bridge::IMPORT_MODULE;
use lwk_host::protocol::{decode_role, encode_message, encode_role};
use lwk_host::{Bridge, BridgeError, Syscall};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{DedicatedWorkerGlobalScope, Performance};

use crate::memory::JsLinearMemory;
use crate::util::{describe, get, js_error, log, set};

/// Message of the error thrown by `halt`
const HALT_SIGNAL: &str = "lwk:halt";

// === Start Message ===

/// First message a context's worker receives
#[derive(Clone, Debug)]
pub struct StartMessage {
    pub id: ContextId,
    pub role: ContextRole,
    pub module: WebAssembly::Module,
    pub memory: WebAssembly::Memory,
    /// Boot context only
    pub devicetree: Option<Vec<u8>>,
    /// `performance.timeOrigin` of the supervisor; the shared clock epoch
    pub time_origin: f64,
    pub debug: bool,
}

impl StartMessage {
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        let role = encode_role(&self.role).map_err(|e| js_error(&e.to_string()))?;
        let msg: JsValue = Object::new().into();
        set(&msg, "id", &JsValue::from(self.id.0))?;
        set(&msg, "role", &JsValue::from_str(&role))?;
        set(&msg, "module", &self.module)?;
        set(&msg, "memory", &self.memory)?;
        if let Some(blob) = &self.devicetree {
            set(&msg, "devicetree", &Uint8Array::from(&blob[..]))?;
        }
        set(&msg, "timeOrigin", &JsValue::from_f64(self.time_origin))?;
        set(&msg, "debug", &JsValue::from_bool(self.debug))?;
        Ok(msg)
    }

    pub fn from_js(msg: &JsValue) -> Result<Self, JsValue> {
        let id = get(msg, "id")?
            .as_f64()
            .ok_or_else(|| js_error("start message: missing id"))? as u32;
        let role = get(msg, "role")?
            .as_string()
            .ok_or_else(|| js_error("start message: missing role"))?;
        let role = decode_role(&role).map_err(|e| js_error(&format!("start message: role: {}", e)))?;
        let module = get(msg, "module")?.dyn_into::<WebAssembly::Module>()?;
        let memory = get(msg, "memory")?.dyn_into::<WebAssembly::Memory>()?;
        let devicetree = get(msg, "devicetree")?
            .dyn_into::<Uint8Array>()
            .ok()
            .map(|blob| blob.to_vec());
        let time_origin = get(msg, "timeOrigin")?.as_f64().unwrap_or(0.0);
        let debug = get(msg, "debug")?.as_bool().unwrap_or(false);
        Ok(Self {
            id: ContextId(id),
            role,
            module,
            memory,
            devicetree,
            time_origin,
            debug,
        })
    }
}

// === Context HAL ===

/// Platform services of one worker
pub struct WorkerContextHal {
    id: ContextId,
    memory: JsLinearMemory,
    scope: Option<DedicatedWorkerGlobalScope>,
    performance: Option<Performance>,
    /// Supervisor's time origin minus ours
    epoch_shift: f64,
}

impl WorkerContextHal {
    pub fn new(id: ContextId, memory: JsLinearMemory, time_origin: f64) -> Self {
        let scope = js_sys::global().dyn_into::<DedicatedWorkerGlobalScope>().ok();
        let performance = scope.as_ref().and_then(|s| s.performance());
        let epoch_shift = performance
            .as_ref()
            .map(|p| p.time_origin() - time_origin)
            .unwrap_or(0.0);
        Self {
            id,
            memory,
            scope,
            performance,
            epoch_shift,
        }
    }
}

impl ContextHal for WorkerContextHal {
    type Memory = JsLinearMemory;

    fn memory(&self) -> &JsLinearMemory {
        &self.memory
    }

    fn now_millis(&self) -> f64 {
        match &self.performance {
            Some(performance) => performance.now() + self.epoch_shift,
            None => js_sys::Date::now(),
        }
    }

    fn post(&self, message: &ContextMessage) -> Result<(), HalError> {
        let scope = self.scope.as_ref().ok_or(HalError::NotSupported)?;
        let payload = encode_message(message).map_err(|_| HalError::InvalidArgument)?;
        scope
            .post_message(&JsValue::from_str(&payload))
            .map_err(|_| HalError::MessageFailed)
    }

    fn capture_backtrace(&self) -> Option<String> {
        let err = js_sys::Error::new("");
        get(&err, "stack").ok()?.as_string()
    }

    fn breakpoint(&self) {
        let _ = Function::new_no_args("debugger").call0(&JsValue::UNDEFINED);
    }

    fn debug_write(&self, msg: &str) {
        log(&format!("[context {}] {}", self.id, msg));
    }
}

// === Import Table ===

type SharedBridge = Rc<RefCell<Bridge<WorkerContextHal>>>;

/// Throw fatal errors into the kernel; everything else was already logged.
fn settle(result: Result<(), BridgeError>) -> Result<(), JsValue> {
    match result {
        Err(e) if e.is_fatal() => Err(js_error(&e.to_string())),
        _ => Ok(()),
    }
}

fn halt_signal() -> JsValue {
    js_error(HALT_SIGNAL)
}

fn is_halt_signal(value: &JsValue) -> bool {
    value
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()) == HALT_SIGNAL)
        .unwrap_or(false)
}

/// JS function for one import. The closure is handed to the JS GC.
fn import_fn(call: Syscall, bridge: SharedBridge) -> JsValue {
    match call {
        Syscall::Breakpoint => Closure::<dyn FnMut()>::new(move || {
            bridge.borrow_mut().breakpoint();
        })
        .into_js_value(),
        Syscall::Halt => Closure::<dyn FnMut() -> Result<(), JsValue>>::new(move || {
            settle(bridge.borrow_mut().halt())?;
            Err(halt_signal())
        })
        .into_js_value(),
        Syscall::Restart => Closure::<dyn FnMut() -> Result<(), JsValue>>::new(move || {
            settle(bridge.borrow_mut().restart())
        })
        .into_js_value(),
        Syscall::BootConsoleWrite => {
            Closure::<dyn FnMut(u32, u32) -> Result<(), JsValue>>::new(move |ptr, len| {
                settle(bridge.borrow_mut().boot_console_write(ptr, len))
            })
            .into_js_value()
        }
        Syscall::BootConsoleClose => Closure::<dyn FnMut() -> Result<(), JsValue>>::new(move || {
            settle(bridge.borrow_mut().boot_console_close())
        })
        .into_js_value(),
        Syscall::ReturnAddress => Closure::<dyn FnMut(i32) -> i32>::new(move |level| {
            bridge.borrow().return_address(level)
        })
        .into_js_value(),
        Syscall::SetIrqEnabled => Closure::<dyn FnMut(i32)>::new(move |enabled| {
            bridge.borrow_mut().set_irq_enabled(enabled);
        })
        .into_js_value(),
        Syscall::GetIrqEnabled => {
            Closure::<dyn FnMut() -> i32>::new(move || bridge.borrow().get_irq_enabled())
                .into_js_value()
        }
        Syscall::GetDt => {
            Closure::<dyn FnMut(u32, u32) -> Result<(), JsValue>>::new(move |ptr, cap| {
                settle(bridge.borrow_mut().get_dt(ptr, cap))
            })
            .into_js_value()
        }
        Syscall::GetNowNsec => {
            Closure::<dyn FnMut() -> u64>::new(move || bridge.borrow_mut().get_now_nsec())
                .into_js_value()
        }
        Syscall::GetStacktrace => {
            Closure::<dyn FnMut(u32, u32) -> Result<(), JsValue>>::new(move |ptr, cap| {
                settle(bridge.borrow_mut().get_stacktrace(ptr, cap))
            })
            .into_js_value()
        }
        Syscall::NewWorker => {
            Closure::<dyn FnMut(u32, u32, u32) -> Result<(), JsValue>>::new(
                move |task, name, len| settle(bridge.borrow_mut().new_worker(task, name, len)),
            )
            .into_js_value()
        }
        Syscall::BringupSecondary => {
            Closure::<dyn FnMut(u32, u32) -> Result<(), JsValue>>::new(move |cpu, idle| {
                settle(bridge.borrow_mut().bringup_secondary(cpu, idle))
            })
            .into_js_value()
        }
    }
}

/// `{ env: { memory }, kernel: { ...syscalls } }`
fn build_imports(bridge: &SharedBridge, memory: &WebAssembly::Memory) -> Result<Object, JsValue> {
    let kernel: JsValue = Object::new().into();
    for call in Syscall::ALL {
        set(&kernel, call.name(), &import_fn(call, bridge.clone()))?;
    }

    let env: JsValue = Object::new().into();
    set(&env, "memory", memory)?;

    let imports = Object::new();
    set(&imports, "env", &env)?;
    set(&imports, IMPORT_MODULE, &kernel)?;
    Ok(imports)
}

// === Entry ===

fn run(start: StartMessage) -> Result<(), JsValue> {
    let hal = WorkerContextHal::new(
        start.id,
        JsLinearMemory::from_memory(start.memory.clone()),
        start.time_origin,
    );
    let entry = start.role.entry_point();
    let args: Array = start
        .role
        .entry_args()
        .into_iter()
        .map(JsValue::from)
        .collect();
    let bridge: SharedBridge = Rc::new(RefCell::new(Bridge::new(
        hal,
        start.id,
        start.role,
        start.devicetree,
        start.debug,
    )));

    let result = enter(&bridge, &start.module, &start.memory, entry, &args);

    // the kernel is no longer running, so nothing else holds the bridge
    let mut bridge = bridge.borrow_mut();
    match result {
        Ok(()) => settle(bridge.entry_finished(false)),
        Err(e) if is_halt_signal(&e) => Err(e),
        Err(e) => {
            let _ = bridge.entry_finished(true);
            Err(e)
        }
    }
}

/// Instantiate the kernel and run the role's entry export.
fn enter(
    bridge: &SharedBridge,
    module: &WebAssembly::Module,
    memory: &WebAssembly::Memory,
    entry: &str,
    args: &Array,
) -> Result<(), JsValue> {
    let imports = build_imports(bridge, memory)?;
    let instance = WebAssembly::Instance::new(module, &imports)?;
    let entry_fn = get(&instance.exports(), entry)?
        .dyn_into::<Function>()
        .map_err(|_| js_error(&format!("kernel does not export `{}`", entry)))?;
    entry_fn.apply(&JsValue::UNDEFINED, args)?;
    Ok(())
}

fn report_failure(id: Option<ContextId>, message: String) {
    let label = id.map(|id| id.to_string()).unwrap_or_else(|| String::from("?"));
    log(&format!("[context {}] failed: {}", label, message));
    let Ok(scope) = js_sys::global().dyn_into::<DedicatedWorkerGlobalScope>() else {
        return;
    };
    if let Ok(payload) = encode_message(&ContextMessage::Error { message }) {
        let _ = scope.post_message(&JsValue::from_str(&payload));
    }
}

/// Run the execution context described by `start`.
///
/// Called by the worker script with the first message it receives.
#[wasm_bindgen]
pub fn context_main(start: JsValue) {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let start = match StartMessage::from_js(&start) {
        Ok(start) => start,
        Err(e) => {
            report_failure(None, describe(&e));
            return;
        }
    };
    let id = start.id;
    log(&format!(
        "[context {}] starting {} ({})",
        id,
        start.role.label(),
        start.role.entry_point()
    ));

    match run(start) {
        Ok(()) => log(&format!("[context {}] entry returned", id)),
        Err(e) if is_halt_signal(&e) => log(&format!("[context {}] halted", id)),
        Err(e) => report_failure(Some(id), describe(&e)),
    }
}
