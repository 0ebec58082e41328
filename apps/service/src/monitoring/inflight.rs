use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Per-target single-flight registry. A slot is held for as long as its
/// [`InFlightGuard`] lives.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `id`, or `None` if a pipeline already holds it.
    pub fn try_acquire(&self, id: Uuid) -> Option<InFlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            id,
            active: Arc::clone(&self.active),
        })
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&id)
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    id: Uuid,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}
