//! Generational storage for controllers
//!
//! Front ends refer to controllers by [`ControllerHandle`]. A handle whose
//! controller was removed never resolves again, even after its slot is reused.

use std::sync::Arc;
use tracing::debug;

use super::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerHandle {
    index: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    controller: Option<Arc<Controller>>,
}

#[derive(Default)]
pub struct ControllerArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl ControllerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, controller: Controller) -> ControllerHandle {
        let controller = Some(Arc::new(controller));
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.controller = controller;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    controller,
                });
                self.slots.len() - 1
            }
        };

        let handle = ControllerHandle {
            index,
            generation: self.slots[index].generation,
        };
        debug!("controller inserted: {:?}", handle);
        handle
    }

    pub fn get(&self, handle: ControllerHandle) -> Option<Arc<Controller>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.controller.clone())
    }

    /// Remove and release a controller; stale handles return `None`
    pub fn remove(&mut self, handle: ControllerHandle) -> Option<Arc<Controller>> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)?;
        let controller = slot.controller.take()?;
        self.free.push(handle.index);

        controller.release();
        debug!("controller removed: {:?}", handle);
        Some(controller)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.controller.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
