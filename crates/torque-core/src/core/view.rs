use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::types::BodyId;
use crate::core::registry::BodyView;

/// All bodies as they stood at the end of one tick.
#[derive(Debug, Clone, Default)]
pub struct ViewFrame {
    pub tick: u64,
    pub bodies: Vec<BodyView>,
}

impl ViewFrame {
    pub fn get(&self, id: BodyId) -> Option<&BodyView> {
        self.bodies.iter().find(|b| b.id == id)
    }
}

/// Read handle to the latest published frame. Cheap to clone; readers on any
/// thread see whole frames only.
#[derive(Clone, Default)]
pub struct SharedView {
    latest: Arc<RwLock<Arc<ViewFrame>>>,
}

impl SharedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, frame: ViewFrame) {
        *self.latest.write() = Arc::new(frame);
    }

    pub fn latest(&self) -> Arc<ViewFrame> {
        Arc::clone(&self.latest.read())
    }

    pub fn tick(&self) -> u64 {
        self.latest.read().tick
    }
}
