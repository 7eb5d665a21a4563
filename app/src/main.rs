use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use coordinator::{
    visibility_channel, CoordinatorConfig, CoordinatorDelegate, MemoryCoordinator,
    MemoryCoordinatorClient, VisibilitySender, VisibilitySource,
};
use ipc::{json_channel, ChildHandle, ChildMessage};
use monitor::SystemMemoryMonitor;
use procs::{MemoryCondition, MemoryState, RenderProcessId};

const TICK: Duration = Duration::from_millis(250);
const SCENARIO_TICKS: u32 = 40;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = load_config().context("loading configuration")?;

    let (visibility_sender, visibility_events) = visibility_channel();
    let desktop = Rc::new(Desktop::new(visibility_sender));
    let delegate = Rc::new(LruDiscardDelegate::default());

    let coordinator = MemoryCoordinator::new(
        Box::new(SystemMemoryMonitor::new()),
        Rc::clone(&delegate) as Rc<dyn CoordinatorDelegate>,
        Rc::clone(&desktop) as Rc<dyn VisibilitySource>,
        visibility_events,
        config,
    );
    coordinator.add_client(Rc::new(LogClient));
    coordinator.start();

    // Two demo renderers, standing in for the shell's startup tabs.
    let mut children = Vec::new();
    for raw in 1..=2u64 {
        let id = RenderProcessId::new(raw);
        let (sink, receiver) = json_channel();
        let handle = ChildHandle::new();
        handle.bind(Rc::new(sink));
        coordinator.create_handle(id, handle);
        coordinator.on_child_added(id);
        children.push(DemoChild { id, receiver });
    }

    let background = RenderProcessId::new(2);
    for tick in 0..SCENARIO_TICKS {
        match tick {
            8 => {
                info!("tab switch backgrounds renderer {background}");
                desktop.set_visible(background, false);
                delegate.on_backgrounded(background);
            }
            16 => {
                info!("simulating memory pressure");
                coordinator
                    .force_set_memory_condition(MemoryCondition::Warning, Duration::from_secs(2));
            }
            24 => {
                info!("requesting suspension of renderer {background}");
                coordinator.set_child_memory_state(background, MemoryState::Suspended);
            }
            32 => {
                info!("simulating critical memory pressure");
                coordinator
                    .force_set_memory_condition(MemoryCondition::Critical, Duration::from_secs(2));
            }
            _ => {}
        }

        coordinator.poll();

        for id in delegate.take_discarded() {
            // A discarded renderer exits; its channel error follows.
            coordinator.on_connection_error(id);
            children.retain(|child| child.id != id);
        }
        for child in &children {
            child.pump();
        }

        thread::sleep(TICK);
    }

    info!(
        "scenario finished with {} renderers tracked",
        coordinator.tracked_children()
    );
    Ok(())
}

fn load_config() -> anyhow::Result<CoordinatorConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(CoordinatorConfig::default());
    };
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config = serde_json::from_str(&contents).with_context(|| format!("parsing {path}"))?;
    Ok(config)
}

/// Stand-in for the window layer: remembers which renderers host visible
/// tabs and feeds transitions into the coordinator's queue.
struct Desktop {
    visible: RefCell<HashMap<RenderProcessId, bool>>,
    sender: VisibilitySender,
}

impl Desktop {
    fn new(sender: VisibilitySender) -> Self {
        Self {
            visible: RefCell::new(HashMap::new()),
            sender,
        }
    }

    fn set_visible(&self, id: RenderProcessId, is_visible: bool) {
        self.visible.borrow_mut().insert(id, is_visible);
        self.sender.send(id, is_visible);
    }
}

impl VisibilitySource for Desktop {
    fn is_process_visible(&self, id: RenderProcessId) -> bool {
        self.visible.borrow().get(&id).copied().unwrap_or(true)
    }
}

/// Discards the renderer that has been backgrounded the longest.
///
/// The shell reports background transitions in order; a real tab strip would
/// rank by engagement instead.
#[derive(Default)]
struct LruDiscardDelegate {
    backgrounded: RefCell<VecDeque<RenderProcessId>>,
    discarded: RefCell<Vec<RenderProcessId>>,
}

impl LruDiscardDelegate {
    fn on_backgrounded(&self, id: RenderProcessId) {
        let mut backgrounded = self.backgrounded.borrow_mut();
        if !backgrounded.contains(&id) {
            backgrounded.push_back(id);
        }
    }

    fn take_discarded(&self) -> Vec<RenderProcessId> {
        self.discarded.borrow_mut().drain(..).collect()
    }
}

impl CoordinatorDelegate for LruDiscardDelegate {
    fn can_suspend_backgrounded_renderer(&self, id: RenderProcessId) -> bool {
        self.backgrounded.borrow().contains(&id)
    }

    fn discard_tab(&self) {
        if let Some(id) = self.backgrounded.borrow_mut().pop_front() {
            info!("discarding renderer {id}");
            self.discarded.borrow_mut().push(id);
        }
    }
}

struct LogClient;

impl MemoryCoordinatorClient for LogClient {
    fn on_state_change(&self, state: MemoryState) {
        info!("browser memory state is now {state}");
    }
}

/// In-process stand-in for a renderer: drains its channel and logs what a
/// real child's memory coordinator would act on.
struct DemoChild {
    id: RenderProcessId,
    receiver: Receiver<String>,
}

impl DemoChild {
    fn pump(&self) {
        while let Ok(raw) = self.receiver.try_recv() {
            match ipc::decode(&raw) {
                Ok(ChildMessage::StateChange { state }) => {
                    info!("renderer {} enters state {state}", self.id);
                }
                Err(error) => warn!("renderer {} dropped a message: {error}", self.id),
            }
        }
    }
}
