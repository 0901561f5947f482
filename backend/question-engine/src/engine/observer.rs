use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

use crate::models::step::Step;

/// Receives change notifications from a usage and its attempts so that the
/// storage layer knows what to write.
pub trait UsageObserver: fmt::Debug + Send + Sync {
    fn notify_modified(&self);

    fn notify_attempt_added(&self, slot: u32);

    fn notify_attempt_modified(&self, slot: u32);

    /// Every stored step of the attempt in `slot` must be removed before the
    /// attempt's steps are written again.
    fn notify_delete_attempt_steps(&self, slot: u32);

    fn notify_step_added(&self, step: &Step, slot: u32, seq: usize);

    fn as_unit_of_work(&self) -> Option<&UnitOfWork> {
        None
    }
}

/// Observer for usages that have never been saved. A first save writes
/// everything anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl UsageObserver for NullObserver {
    fn notify_modified(&self) {}

    fn notify_attempt_added(&self, _slot: u32) {}

    fn notify_attempt_modified(&self, _slot: u32) {}

    fn notify_delete_attempt_steps(&self, _slot: u32) {}

    fn notify_step_added(&self, _step: &Step, _slot: u32, _seq: usize) {}
}

/// Changes accumulated since the last save.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingChanges {
    pub usage_modified: bool,
    pub attempts_added: BTreeSet<u32>,
    pub attempts_modified: BTreeSet<u32>,
    pub steps_deleted: BTreeSet<u32>,
    pub steps_added: BTreeSet<(u32, usize)>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        !self.usage_modified
            && self.attempts_added.is_empty()
            && self.attempts_modified.is_empty()
            && self.steps_deleted.is_empty()
            && self.steps_added.is_empty()
    }

    /// Slots whose attempt row needs an update (new attempts excluded).
    pub fn slots_to_update(&self) -> BTreeSet<u32> {
        self.attempts_modified
            .iter()
            .chain(self.steps_deleted.iter())
            .chain(self.steps_added.iter().map(|(slot, _)| slot))
            .filter(|slot| !self.attempts_added.contains(slot))
            .copied()
            .collect()
    }
}

/// Observer installed on stored usages.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    changes: Mutex<PendingChanges>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PendingChanges {
        self.lock().clone()
    }

    pub fn take(&self) -> PendingChanges {
        std::mem::take(&mut *self.lock())
    }

    /// Puts back changes taken for a save that did not go through.
    pub fn restore(&self, taken: PendingChanges) {
        let mut changes = self.lock();
        changes.usage_modified |= taken.usage_modified;
        changes.attempts_added.extend(taken.attempts_added);
        changes.attempts_modified.extend(taken.attempts_modified);
        changes.steps_deleted.extend(taken.steps_deleted);
        changes.steps_added.extend(taken.steps_added);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingChanges> {
        self.changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UsageObserver for UnitOfWork {
    fn notify_modified(&self) {
        self.lock().usage_modified = true;
    }

    fn notify_attempt_added(&self, slot: u32) {
        let mut changes = self.lock();
        changes.attempts_added.insert(slot);
        changes.attempts_modified.remove(&slot);
    }

    fn notify_attempt_modified(&self, slot: u32) {
        let mut changes = self.lock();
        if !changes.attempts_added.contains(&slot) {
            changes.attempts_modified.insert(slot);
        }
    }

    fn notify_delete_attempt_steps(&self, slot: u32) {
        let mut changes = self.lock();
        if changes.attempts_added.contains(&slot) {
            return;
        }
        changes.steps_added.retain(|(s, _)| *s != slot);
        changes.steps_deleted.insert(slot);
    }

    fn notify_step_added(&self, _step: &Step, slot: u32, seq: usize) {
        let mut changes = self.lock();
        if !changes.attempts_added.contains(&slot) {
            changes.steps_added.insert((slot, seq));
        }
    }

    fn as_unit_of_work(&self) -> Option<&UnitOfWork> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step::VarMap;

    #[test]
    fn added_attempts_swallow_their_own_changes() {
        let uow = UnitOfWork::new();
        let step = Step::new(VarMap::new(), None, None);
        uow.notify_attempt_added(3);
        uow.notify_step_added(&step, 3, 1);
        uow.notify_attempt_modified(3);

        let changes = uow.take();
        assert_eq!(changes.attempts_added, BTreeSet::from([3]));
        assert!(changes.steps_added.is_empty());
        assert!(changes.attempts_modified.is_empty());
        assert!(uow.take().is_empty());
    }

    #[test]
    fn deleting_steps_drops_unsaved_step_inserts() {
        let uow = UnitOfWork::new();
        let step = Step::new(VarMap::new(), None, None);
        uow.notify_step_added(&step, 1, 2);
        uow.notify_step_added(&step, 2, 4);
        uow.notify_delete_attempt_steps(1);
        uow.notify_step_added(&step, 1, 0);

        let changes = uow.snapshot();
        assert_eq!(changes.steps_deleted, BTreeSet::from([1]));
        assert_eq!(changes.steps_added, BTreeSet::from([(1, 0), (2, 4)]));
        assert_eq!(changes.slots_to_update(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn null_observer_is_not_a_unit_of_work() {
        assert!(NullObserver.as_unit_of_work().is_none());
        assert!(UnitOfWork::new().as_unit_of_work().is_some());
    }
}
