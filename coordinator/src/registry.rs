use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ipc::ChildHandle;
use procs::{MemoryState, RenderProcessId};

/// Per-child record tracked by the registry.
///
/// Exists from the moment the browser binds the child's memory channel until
/// that channel disconnects. The stored state is never `Unknown`.
#[derive(Debug)]
pub struct ChildInfo {
    pub memory_state: MemoryState,
    pub is_visible: bool,
    handle: Rc<ChildHandle>,
}

impl ChildInfo {
    fn new(handle: ChildHandle) -> Self {
        Self {
            memory_state: MemoryState::Normal,
            is_visible: true,
            handle: Rc::new(handle),
        }
    }
}

/// Copy of one child's fields, taken before any mutation or policy call so
/// embedder code never runs under a registry borrow.
#[derive(Debug, Clone)]
pub struct ChildSnapshot {
    pub memory_state: MemoryState,
    pub is_visible: bool,
    pub handle: Rc<ChildHandle>,
}

/// Keyed store of connected child processes.
///
/// Insertion happens on handle creation, erasure on the connection-error
/// callback. No ordering across entries is guaranteed.
#[derive(Debug, Default)]
pub struct ChildProcessRegistry {
    children: RefCell<HashMap<RenderProcessId, ChildInfo>>,
}

impl ChildProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh entry for `id`. A stale entry for the same id, left
    /// over from a missed disconnect, is replaced wholesale.
    pub fn insert(&self, id: RenderProcessId, handle: ChildHandle) {
        self.children.borrow_mut().insert(id, ChildInfo::new(handle));
    }

    /// Erases the entry for `id`. Returns whether anything was removed.
    pub fn erase(&self, id: RenderProcessId) -> bool {
        self.children.borrow_mut().remove(&id).is_some()
    }

    pub fn contains(&self, id: RenderProcessId) -> bool {
        self.children.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.borrow().is_empty()
    }

    /// Returns a copy of the child's fields, or `None` if untracked.
    pub fn snapshot(&self, id: RenderProcessId) -> Option<ChildSnapshot> {
        self.children.borrow().get(&id).map(|child| ChildSnapshot {
            memory_state: child.memory_state,
            is_visible: child.is_visible,
            handle: Rc::clone(&child.handle),
        })
    }

    pub fn memory_state(&self, id: RenderProcessId) -> Option<MemoryState> {
        self.children.borrow().get(&id).map(|child| child.memory_state)
    }

    pub fn is_visible(&self, id: RenderProcessId) -> Option<bool> {
        self.children.borrow().get(&id).map(|child| child.is_visible)
    }

    pub fn set_memory_state(&self, id: RenderProcessId, state: MemoryState) -> bool {
        match self.children.borrow_mut().get_mut(&id) {
            Some(child) => {
                child.memory_state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_visible(&self, id: RenderProcessId, is_visible: bool) -> bool {
        match self.children.borrow_mut().get_mut(&id) {
            Some(child) => {
                child.is_visible = is_visible;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all tracked ids, for iteration that mutates entries.
    pub fn ids(&self) -> Vec<RenderProcessId> {
        self.children.borrow().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entries_start_normal_and_visible() {
        let registry = ChildProcessRegistry::new();
        let id = RenderProcessId::new(7);
        registry.insert(id, ChildHandle::new());

        let child = registry.snapshot(id).unwrap();
        assert_eq!(child.memory_state, MemoryState::Normal);
        assert!(child.is_visible);
        assert!(!child.handle.is_bound());
    }

    #[test]
    fn erase_forgets_the_child() {
        let registry = ChildProcessRegistry::new();
        let id = RenderProcessId::new(7);
        registry.insert(id, ChildHandle::new());

        assert!(registry.erase(id));
        assert!(!registry.erase(id));
        assert!(registry.snapshot(id).is_none());
        assert!(!registry.set_memory_state(id, MemoryState::Throttled));
    }

    #[test]
    fn reinsertion_replaces_a_stale_entry() {
        let registry = ChildProcessRegistry::new();
        let id = RenderProcessId::new(7);
        registry.insert(id, ChildHandle::new());
        registry.set_memory_state(id, MemoryState::Throttled);
        registry.set_visible(id, false);

        registry.insert(id, ChildHandle::new());
        let child = registry.snapshot(id).unwrap();
        assert_eq!(child.memory_state, MemoryState::Normal);
        assert!(child.is_visible);
    }
}
