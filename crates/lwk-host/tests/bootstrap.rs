//! End-to-end boot with scripted kernels
//!
//! Every launched context gets a bridge over the same arena. A scripted
//! "kernel" per role drives the bridge; the messages it posts travel back to
//! the orchestrator as JSON, the same way they cross the worker boundary.

use fdt::Fdt;
use lwk_hal::{ContextHal, ContextRole, LaunchSpec, LinearMemory};
use lwk_hal_mock::{MockContextHal, MockHal, MockMemory};
use lwk_host::protocol::encode_message;
use lwk_host::{BootConfig, Bridge, ContextState, Orchestrator};

/// How a scripted entry export stops
enum Exit {
    /// Still running when the script ends (an idle loop)
    Running,
    Returned,
    Trapped,
}

struct Machine {
    orchestrator: Orchestrator<MockHal>,
    memory: MockMemory,
    started: usize,
}

impl Machine {
    fn new(config: BootConfig) -> Self {
        let memory = MockMemory::with_pages(config.memory_pages as usize);
        let orchestrator = Orchestrator::new(MockHal::new(), config).unwrap();
        Self {
            orchestrator,
            memory,
            started: 0,
        }
    }

    /// Run every context launched since the last call, then pump, until
    /// no new contexts appear.
    fn run(&mut self, kernel: impl Fn(&mut Bridge<MockContextHal>) -> Exit) {
        loop {
            let launches = self.orchestrator.hal().launches();
            if self.started == launches.len() {
                break;
            }
            for spec in &launches[self.started..] {
                self.run_context(spec, &kernel);
            }
            self.started = launches.len();
            self.orchestrator.pump();
        }
    }

    fn run_context(
        &mut self,
        spec: &LaunchSpec,
        kernel: &impl Fn(&mut Bridge<MockContextHal>) -> Exit,
    ) {
        let hal = MockContextHal::new(self.memory.clone());
        let mut bridge = Bridge::new(hal, spec.id, spec.role.clone(), spec.devicetree.clone(), false);
        match kernel(&mut bridge) {
            Exit::Running => {}
            Exit::Returned => bridge.entry_finished(false).unwrap(),
            Exit::Trapped => bridge.entry_finished(true).unwrap(),
        }
        for message in bridge.hal().take_posted() {
            let payload = encode_message(&message).unwrap();
            assert!(self.orchestrator.handle_raw(spec.id, &payload));
        }
    }
}

fn say(bridge: &mut Bridge<MockContextHal>, text: &str) {
    let scratch = 0x1000 + bridge.id().0 as usize * 0x100;
    bridge.hal().memory().write(scratch, text.as_bytes()).unwrap();
    bridge.boot_console_write(scratch as u32, text.len() as u32).unwrap();
}

/// Boot brings up two CPUs and one task; the task spawns a helper. Every
/// context but boot prints a line and halts.
fn smp_kernel(bridge: &mut Bridge<MockContextHal>) -> Exit {
    let scratch = 0x1000 + bridge.id().0 as u32 * 0x100;

    match bridge.role().clone() {
        ContextRole::Boot => {
            bridge.get_dt(0, 0x1000).unwrap();
            say(bridge, "Booting\n");
            bridge.bringup_secondary(1, 11).unwrap();
            bridge.bringup_secondary(2, 12).unwrap();
            bridge.hal().memory().write(scratch as usize, b"kworker").unwrap();
            bridge.new_worker(7, scratch, 7).unwrap();
            Exit::Running
        }
        ContextRole::Secondary { cpu, .. } => {
            say(bridge, &format!("CPU{} up\n", cpu));
            bridge.halt().unwrap();
            Exit::Returned
        }
        ContextRole::Task { handle: 7, .. } => {
            bridge.hal().memory().write(scratch as usize, b"helper").unwrap();
            bridge.new_worker(8, scratch, 6).unwrap();
            say(bridge, "kworker running");
            bridge.halt().unwrap();
            Exit::Returned
        }
        ContextRole::Task { .. } => {
            // device tree is boot-only; the violation is not fatal
            assert!(bridge.get_dt(0x8000, 0x1000).is_err());
            bridge.halt().unwrap();
            Exit::Returned
        }
    }
}

/// Boot starts one task that prints an unterminated line and dies.
fn crashing_kernel(bridge: &mut Bridge<MockContextHal>) -> Exit {
    match bridge.role().clone() {
        ContextRole::Boot => {
            bridge.hal().memory().write(0x1000, b"kworker").unwrap();
            bridge.new_worker(1, 0x1000, 7).unwrap();
            say(bridge, "no newline before return");
            Exit::Returned
        }
        _ => {
            say(bridge, "Kernel panic - not syncing");
            Exit::Trapped
        }
    }
}

#[test]
fn test_smp_boot() {
    let mut machine = Machine::new(BootConfig {
        memory_pages: 16,
        ..BootConfig::default()
    });
    machine.orchestrator.boot().unwrap();
    machine.run(smp_kernel);

    let orch = &machine.orchestrator;
    let labels: Vec<String> = orch.contexts().map(|c| c.role.label()).collect();
    assert_eq!(labels, ["boot", "entry1", "entry2", "kworker", "helper"]);

    let stats = orch.stats();
    assert_eq!(stats.launched, 5);
    assert_eq!(stats.halted, 4);
    assert_eq!(stats.dropped, 0);
    assert_eq!(orch.running_count(), 1);
    assert!(orch
        .contexts()
        .filter(|c| c.role != ContextRole::Boot)
        .all(|c| c.state == ContextState::Halted));

    let console = orch.hal().console();
    assert!(console.contains(&("boot".to_string(), "Booting".to_string())));
    assert!(console.contains(&("entry2".to_string(), "CPU2 up".to_string())));
    // partial line flushed on halt
    assert!(console.contains(&("kworker".to_string(), "kworker running".to_string())));
}

#[test]
fn test_unterminated_console_text_survives_context_exit() {
    let mut machine = Machine::new(BootConfig {
        memory_pages: 4,
        ..BootConfig::default()
    });
    machine.orchestrator.boot().unwrap();
    machine.run(crashing_kernel);

    let orch = &machine.orchestrator;
    let console = orch.hal().console();
    assert!(console.contains(&("boot".to_string(), "no newline before return".to_string())));
    assert!(console.contains(&("kworker".to_string(), "Kernel panic - not syncing".to_string())));

    // a returning entry is a halt, a trap is reported separately
    let states: Vec<ContextState> = orch.contexts().map(|c| c.state).collect();
    assert_eq!(states, [ContextState::Halted, ContextState::Running]);
}

#[test]
fn test_boot_context_reads_its_devicetree_from_shared_memory() {
    let mut machine = Machine::new(BootConfig {
        cmdline: "console=hvc0 loglevel=8".into(),
        memory_pages: 16,
        ..BootConfig::default()
    });
    machine.orchestrator.boot().unwrap();
    machine.run(smp_kernel);

    let header = machine.memory.read_vec(0, 8).unwrap();
    let totalsize = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let blob = machine.memory.read_vec(0, totalsize).unwrap();
    let fdt = Fdt::new(&blob).unwrap();

    assert_eq!(fdt.chosen().bootargs(), Some("console=hvc0 loglevel=8"));
    let reg = fdt.find_node("/memory").unwrap().property("reg").unwrap().value;
    assert_eq!(reg, [0, 0, 0, 0, 0, 0x10, 0, 0]);
    // the helper's rejected get_dt left its target untouched
    assert_eq!(machine.memory.read_vec(0x8000, 0x1000).unwrap(), vec![0; 0x1000]);
}
