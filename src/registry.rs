//! Workflow registry
//!
//! Bounded concurrent map from executor slot to active workflow. Reserving a
//! slot is the admission check; the slot is released through an RAII guard so
//! every exit path (normal return, failure, pause, abort, panic) frees
//! capacity. Lookups are linear scans under the lock; capacity is tens at
//! most.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::workflow::Workflow;

struct Entry {
    workflow: Option<Arc<dyn Workflow>>,
    execution_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<u64, Entry>,
    next_slot: u64,
}

pub struct WorkflowRegistry {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl WorkflowRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live entries, including reserved-but-unbound slots.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn at_capacity(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Atomic admission check and slot allocation.
    pub fn try_reserve(self: &Arc<Self>) -> Result<SlotGuard, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.capacity {
            return Err(RegistryError::Full);
        }
        let slot_id = inner.next_slot;
        inner.next_slot = inner.next_slot.wrapping_add(1);
        inner.entries.insert(
            slot_id,
            Entry {
                workflow: None,
                execution_id: None,
            },
        );
        Ok(SlotGuard {
            registry: Arc::clone(self),
            slot_id,
        })
    }

    /// Attach a workflow handle to a reserved slot once execution starts.
    /// Execution ids must be pairwise distinct among live entries.
    pub fn bind(
        &self,
        slot: &SlotGuard,
        workflow: Arc<dyn Workflow>,
        execution_id: &str,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .values()
            .any(|e| e.execution_id.as_deref() == Some(execution_id))
        {
            return Err(RegistryError::DuplicateExecution(execution_id.to_string()));
        }
        let entry = inner
            .entries
            .get_mut(&slot.slot_id)
            .expect("slot released while its guard is still live");
        entry.workflow = Some(workflow);
        entry.execution_id = Some(execution_id.to_string());
        Ok(())
    }

    pub fn lookup_by_execution_id(&self, execution_id: &str) -> Option<Arc<dyn Workflow>> {
        self.inner
            .lock()
            .entries
            .values()
            .find(|e| e.execution_id.as_deref() == Some(execution_id))
            .and_then(|e| e.workflow.clone())
    }

    /// Handles of every bound workflow, for the shutdown abort sweep.
    pub fn live_workflows(&self) -> Vec<Arc<dyn Workflow>> {
        self.inner
            .lock()
            .entries
            .values()
            .filter_map(|e| e.workflow.clone())
            .collect()
    }

    fn release(&self, slot_id: u64) {
        self.inner.lock().entries.remove(&slot_id);
    }
}

/// Holding the guard is holding the slot; dropping it frees capacity.
pub struct SlotGuard {
    registry: Arc<WorkflowRegistry>,
    slot_id: u64,
}

impl SlotGuard {
    pub fn id(&self) -> u64 {
        self.slot_id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.release(self.slot_id);
    }
}
