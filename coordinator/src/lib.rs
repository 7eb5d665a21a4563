//! Memory-pressure coordination for the browser process.
//!
//! The coordinator owns the global memory condition, tracks every connected
//! renderer in a registry, and assigns each process a target memory state as
//! a function of the condition and its visibility. State-change messages go
//! out over per-child channels, fire and forget. Everything here runs on the
//! browser main sequence, so interior mutability stands in for locks.

mod observer;
mod registry;
mod visibility;

pub use observer::MemoryConditionObserver;
pub use registry::{ChildInfo, ChildProcessRegistry, ChildSnapshot};
pub use visibility::{visibility_channel, VisibilityEvent, VisibilityEvents, VisibilitySender};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ipc::ChildHandle;
use monitor::{MemoryMonitor, MemoryThresholds, MonitorConfig};
use procs::{MemoryCondition, MemoryState, RenderProcessId};

/// Embedder policy hooks consulted by the coordinator.
pub trait CoordinatorDelegate {
    /// Whether the given backgrounded renderer may be suspended.
    fn can_suspend_backgrounded_renderer(&self, id: RenderProcessId) -> bool;

    /// Discards the least valuable tab, if there is one. Best effort.
    fn discard_tab(&self);
}

/// Default policy for embedders with nothing to enforce: suspension is never
/// authorized and discard requests are ignored.
#[derive(Debug, Default)]
pub struct DenyAllDelegate;

impl CoordinatorDelegate for DenyAllDelegate {
    fn can_suspend_backgrounded_renderer(&self, _id: RenderProcessId) -> bool {
        false
    }

    fn discard_tab(&self) {}
}

/// In-process consumer of the browser process's own memory state.
///
/// Clients are notified only when the browser state actually transitions,
/// which the dwell gate limits to one change per transition period.
pub trait MemoryCoordinatorClient {
    fn on_state_change(&self, state: MemoryState);
}

/// Point query against the window layer for a process's current visibility.
///
/// Transitions arrive through the [`visibility_channel`] queue; this lookup
/// seeds the first real state of a child that just completed its handshake.
pub trait VisibilitySource {
    fn is_process_visible(&self, id: RenderProcessId) -> bool;
}

/// Tuning for the coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Minimum dwell between browser-process state transitions.
    pub minimum_state_transition_period: Duration,
    /// Throttle backgrounded renderers as soon as they are assigned `Normal`,
    /// for platforms that cannot afford idle background renderers at all.
    pub throttle_backgrounded_renderers: bool,
    pub thresholds: MemoryThresholds,
    pub monitor: MonitorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            minimum_state_transition_period: Duration::from_secs(30),
            throttle_backgrounded_renderers: cfg!(target_os = "android"),
            thresholds: MemoryThresholds::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Target state for a process under the given condition and visibility.
pub fn memory_state_for_process(condition: MemoryCondition, is_visible: bool) -> MemoryState {
    match condition {
        MemoryCondition::Normal => MemoryState::Normal,
        MemoryCondition::Warning => {
            if is_visible {
                MemoryState::Normal
            } else {
                MemoryState::Throttled
            }
        }
        MemoryCondition::Critical => MemoryState::Throttled,
    }
}

/// The control loop: reacts to condition changes and visibility transitions,
/// computes per-process target states, and pushes them out.
///
/// One instance per browser process, built and owned by the composition root
/// and shared by reference with everything that feeds it events.
pub struct MemoryCoordinator {
    config: CoordinatorConfig,
    delegate: Rc<dyn CoordinatorDelegate>,
    visibility_source: Rc<dyn VisibilitySource>,
    visibility_events: VisibilityEvents,
    observer: MemoryConditionObserver,
    children: ChildProcessRegistry,
    condition: Cell<MemoryCondition>,
    browser_state: Cell<MemoryState>,
    last_browser_transition: Cell<Option<Instant>>,
    clients: RefCell<Vec<Rc<dyn MemoryCoordinatorClient>>>,
    started: Cell<bool>,
}

impl MemoryCoordinator {
    pub fn new(
        monitor: Box<dyn MemoryMonitor>,
        delegate: Rc<dyn CoordinatorDelegate>,
        visibility_source: Rc<dyn VisibilitySource>,
        visibility_events: VisibilityEvents,
        config: CoordinatorConfig,
    ) -> Self {
        let observer = MemoryConditionObserver::new(monitor, config.thresholds, config.monitor);
        Self {
            config,
            delegate,
            visibility_source,
            visibility_events,
            observer,
            children: ChildProcessRegistry::new(),
            condition: Cell::new(MemoryCondition::Normal),
            browser_state: Cell::new(MemoryState::Normal),
            last_browser_transition: Cell::new(None),
            clients: RefCell::new(Vec::new()),
            started: Cell::new(false),
        }
    }

    /// Starts periodic condition evaluation and performs the first one.
    ///
    /// Must be called exactly once; a second call is a wiring bug.
    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    fn start_at(&self, now: Instant) {
        assert!(
            !self.started.replace(true),
            "MemoryCoordinator::start() called twice"
        );
        self.observer.schedule_update_condition(now, Duration::ZERO);
        if let Some(condition) = self.observer.poll(now) {
            self.update_condition_if_needed_at(condition, now);
        }
    }

    /// Drives the loop: drains pending visibility events in arrival order,
    /// then runs the condition evaluation if one is due. Called from the
    /// main-loop tick.
    pub fn poll(&self) {
        self.poll_at(Instant::now());
    }

    fn poll_at(&self, now: Instant) {
        for event in self.visibility_events.drain() {
            self.on_child_visibility_changed(event.id, event.is_visible);
        }
        if let Some(condition) = self.observer.poll(now) {
            self.update_condition_if_needed_at(condition, now);
        }
    }

    /// Binds the browser-side endpoint for a new child and begins tracking it
    /// with default state. The wiring layer delivers [`on_connection_error`]
    /// when the channel disconnects.
    ///
    /// [`on_connection_error`]: Self::on_connection_error
    pub fn create_handle(&self, id: RenderProcessId, handle: ChildHandle) {
        debug!("tracking child {id}");
        self.children.insert(id, handle);
    }

    /// Handshake ack from the child's own coordinator. Seeds the child's
    /// first real target state from its current visibility. No-op if the
    /// process already disconnected.
    pub fn on_child_added(&self, id: RenderProcessId) {
        if !self.children.contains(id) {
            return;
        }
        let is_visible = self.visibility_source.is_process_visible(id);
        self.on_child_visibility_changed(id, is_visible);
    }

    /// Channel disconnect: forget the child. Safe for ids that were never
    /// tracked; disconnect races are routine.
    pub fn on_connection_error(&self, id: RenderProcessId) {
        if self.children.erase(id) {
            debug!("child {id} disconnected");
        }
    }

    /// Updates a child's visibility and recomputes its target state against
    /// the current condition. No-op if the process is untracked.
    pub fn on_child_visibility_changed(&self, id: RenderProcessId, is_visible: bool) {
        if !self.children.set_visible(id, is_visible) {
            return;
        }
        let state = memory_state_for_process(self.condition.get(), is_visible);
        self.set_child_memory_state(id, state);
    }

    /// Assigns `state` to one child, after policy adjustment.
    ///
    /// Returns `false` for `Unknown`, for untracked ids, for children whose
    /// handshake has not completed, and for unauthorized suspension. Setting
    /// the state a child already has is a success that sends nothing.
    pub fn set_child_memory_state(&self, id: RenderProcessId, state: MemoryState) -> bool {
        if state == MemoryState::Unknown {
            return false;
        }
        let Some(child) = self.children.snapshot(id) else {
            return false;
        };
        if !child.handle.is_bound() {
            return false;
        }

        let state = self.override_state(state, child.is_visible);
        if state == child.memory_state {
            return true;
        }
        if state == MemoryState::Suspended && !self.delegate.can_suspend_backgrounded_renderer(id)
        {
            return false;
        }

        debug!("child {id} memory state {} -> {state}", child.memory_state);
        self.children.set_memory_state(id, state);
        child.handle.send_state_change(state);
        true
    }

    /// Stored state for a child, or `Unknown` if untracked.
    pub fn get_child_memory_state(&self, id: RenderProcessId) -> MemoryState {
        self.children
            .memory_state(id)
            .unwrap_or(MemoryState::Unknown)
    }

    /// The browser process's own current state.
    pub fn get_current_memory_state(&self) -> MemoryState {
        self.browser_state.get()
    }

    /// The current global condition.
    pub fn current_memory_condition(&self) -> MemoryCondition {
        self.condition.get()
    }

    pub fn tracked_children(&self) -> usize {
        self.children.len()
    }

    /// Registers an in-process consumer of browser state transitions.
    pub fn add_client(&self, client: Rc<dyn MemoryCoordinatorClient>) {
        self.clients.borrow_mut().push(client);
    }

    /// Diagnostic hook: evaluates `condition` immediately and pushes the next
    /// natural evaluation out to `duration` from now.
    pub fn force_set_memory_condition(&self, condition: MemoryCondition, duration: Duration) {
        self.force_set_memory_condition_at(condition, duration, Instant::now());
    }

    fn force_set_memory_condition_at(
        &self,
        condition: MemoryCondition,
        duration: Duration,
        now: Instant,
    ) {
        self.update_condition_if_needed_at(condition, now);
        self.observer.schedule_update_condition(now, duration);
    }

    /// Central transition function, fed by every condition evaluation.
    pub fn update_condition_if_needed(&self, next: MemoryCondition) {
        self.update_condition_if_needed_at(next, Instant::now());
    }

    fn update_condition_if_needed_at(&self, next: MemoryCondition, now: Instant) {
        if next == MemoryCondition::Critical {
            // Shed the least valuable resource on every critical evaluation,
            // whether or not the stored condition is already critical.
            self.delegate.discard_tab();
        }

        let current = self.condition.get();
        if next == current {
            return;
        }
        info!("memory condition {current} -> {next}");
        self.condition.set(next);

        match next {
            MemoryCondition::Normal => {
                self.update_browser_state_and_notify(MemoryState::Normal, now);
                for id in self.children.ids() {
                    self.set_child_memory_state(id, MemoryState::Normal);
                }
            }
            MemoryCondition::Warning => {
                self.update_browser_state_and_notify(MemoryState::Normal, now);
                for id in self.children.ids() {
                    if let Some(is_visible) = self.children.is_visible(id) {
                        let state = if is_visible {
                            MemoryState::Normal
                        } else {
                            MemoryState::Throttled
                        };
                        self.set_child_memory_state(id, state);
                    }
                }
            }
            MemoryCondition::Critical => {
                self.update_browser_state_and_notify(MemoryState::Throttled, now);
                for id in self.children.ids() {
                    self.set_child_memory_state(id, MemoryState::Throttled);
                }
            }
        }
    }

    /// Policy adjustment applied before any child state is persisted.
    fn override_state(&self, state: MemoryState, is_visible: bool) -> MemoryState {
        // Visible renderers are never suspended.
        if is_visible && state == MemoryState::Suspended {
            return MemoryState::Throttled;
        }
        if !is_visible
            && state == MemoryState::Normal
            && self.config.throttle_backgrounded_renderers
        {
            return MemoryState::Throttled;
        }
        state
    }

    /// Browser-process transitions go through the dwell gate: a change
    /// landing within the transition period of the previous one is dropped,
    /// and the next evaluation retries.
    fn update_browser_state_and_notify(&self, next: MemoryState, now: Instant) {
        if next == self.browser_state.get() {
            return;
        }
        if let Some(last) = self.last_browser_transition.get() {
            if now.duration_since(last) < self.config.minimum_state_transition_period {
                debug!("browser transition to {next} suppressed by dwell gate");
                return;
            }
        }
        info!("browser memory state {} -> {next}", self.browser_state.get());
        self.browser_state.set(next);
        self.last_browser_transition.set(Some(now));

        let clients: Vec<_> = self.clients.borrow().iter().cloned().collect();
        for client in clients {
            client.on_state_change(next);
        }
    }
}
