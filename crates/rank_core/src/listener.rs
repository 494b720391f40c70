//! Change notifications between the rank caches.
//!
//! The registry and the assignment cache hold only weak references to
//! their listeners, so a dropped listener silently stops receiving events.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::types::{Assignment, GroupDefinition, PlayerId};

/// Receives cache changes. Every method is invoked on the main context.
pub trait RankListener: Send + Sync {
    /// A group's prefix changed.
    fn group_updated(&self, _group: &GroupDefinition) {}

    /// An assignment was committed to the cache, or persisted for a
    /// player who is not connected.
    fn assignment_changed(&self, _player: PlayerId, _assignment: &Assignment) {}

    /// A player disconnected; `last` is the assignment they held.
    fn session_ended(&self, _player: PlayerId, _last: Option<&Assignment>) {}
}

#[derive(Default)]
pub(crate) struct Listeners {
    entries: RwLock<Vec<Weak<dyn RankListener>>>,
}

impl Listeners {
    pub(crate) fn subscribe(&self, listener: Weak<dyn RankListener>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(listener);
    }

    /// Calls `f` for every live listener in subscription order.
    ///
    /// The list is copied first so listeners may subscribe others.
    pub(crate) fn notify(&self, f: impl Fn(&dyn RankListener)) {
        let live: Vec<Arc<dyn RankListener>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in live {
            f(listener.as_ref());
        }
    }
}
