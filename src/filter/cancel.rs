use std::cell::Cell;
use std::rc::Rc;

/// Shared "alive" flag between a filter and the tasks it schedules.
///
/// Tasks hold a clone and check it before touching the filter. Cancelling is permanent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}
