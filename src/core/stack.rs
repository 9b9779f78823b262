//! Priority-ordered middleware stack backing a single pipeline phase.
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::handler::Middleware;

/// Placement of a middleware entry within its phase.
///
/// Execution order is head, then normal, then tail. `TopHead` and `TopTail`
/// prepend within their region; the remaining priorities append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// First element of the head region.
    TopHead,
    /// Appended to the head region.
    Head,
    /// Appended to the normal region.
    Normal,
    /// First element of the tail region.
    TopTail,
    /// Appended to the tail region.
    Tail,
}

/// Per-phase container of middleware entries with a memoized flattened view.
#[derive(Default)]
pub struct Stack {
    head: Vec<Middleware>,
    normal: Vec<Middleware>,
    tail: Vec<Middleware>,
    memo: Mutex<Option<Arc<[Middleware]>>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a middleware entry according to its priority. Invalidates the
    /// memoized view.
    pub fn push(&mut self, priority: Priority, mw: Middleware) {
        *self.memo_slot() = None;
        match priority {
            Priority::TopHead => self.head.insert(0, mw),
            Priority::Head => self.head.push(mw),
            Priority::Normal => self.normal.push(mw),
            Priority::TopTail => self.tail.insert(0, mw),
            Priority::Tail => self.tail.push(mw),
        }
    }

    /// Flatten into execution order: head ++ normal ++ tail. The result is
    /// computed once and reused until the next mutation.
    pub fn join(&self) -> Arc<[Middleware]> {
        let mut memo = self.memo_slot();
        if let Some(joined) = memo.as_ref() {
            return Arc::clone(joined);
        }
        let joined: Arc<[Middleware]> = self
            .head
            .iter()
            .chain(self.normal.iter())
            .chain(self.tail.iter())
            .cloned()
            .collect();
        *memo = Some(Arc::clone(&joined));
        joined
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.normal.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn memo_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<[Middleware]>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
