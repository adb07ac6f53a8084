//! Process-local guard allowing one pending proposal per actor
//!
//! The lock is only held for the duration of a set operation, never across
//! an await point. Cross-process exclusivity is not provided here; the
//! persistence layer's active-marriage constraint is the final authority.

use super::types::ActorId;
use crate::error::Party;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ExclusivitySet {
    engaged: Mutex<HashSet<ActorId>>,
}

impl ExclusivitySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn engaged(&self) -> MutexGuard<'_, HashSet<ActorId>> {
        self.engaged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.engaged().contains(&actor)
    }

    pub fn len(&self) -> usize {
        self.engaged().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engaged().is_empty()
    }

    /// Report which party, if any, is already engaged
    pub fn check(&self, instigator: ActorId, target: ActorId) -> Result<(), Party> {
        Self::busy_party(&self.engaged(), instigator, target)
    }

    fn busy_party(
        engaged: &HashSet<ActorId>,
        instigator: ActorId,
        target: ActorId,
    ) -> Result<(), Party> {
        if engaged.contains(&instigator) {
            Err(Party::Instigator)
        } else if engaged.contains(&target) {
            Err(Party::Target)
        } else {
            Ok(())
        }
    }

    /// Atomically check and insert both actors.
    ///
    /// The returned guard removes both ids when dropped.
    pub fn reserve(
        self: &Arc<Self>,
        instigator: ActorId,
        target: ActorId,
    ) -> Result<Reservation, Party> {
        let size = {
            let mut engaged = self.engaged();
            Self::busy_party(&engaged, instigator, target)?;
            engaged.insert(instigator);
            engaged.insert(target);
            engaged.len()
        };

        debug!("Reserved actors {} and {}", instigator, target);
        crate::metrics::set_engaged_actors(size);

        Ok(Reservation {
            set: self.clone(),
            actors: [instigator, target],
        })
    }

    fn release(&self, actors: &[ActorId; 2]) {
        let size = {
            let mut engaged = self.engaged();
            for actor in actors {
                engaged.remove(actor);
            }
            engaged.len()
        };

        debug!("Released actors {} and {}", actors[0], actors[1]);
        crate::metrics::set_engaged_actors(size);
    }
}

/// Membership of two actors in the exclusivity set
#[derive(Debug)]
pub struct Reservation {
    set: Arc<ExclusivitySet>,
    actors: [ActorId; 2],
}

impl Reservation {
    pub fn actors(&self) -> [ActorId; 2] {
        self.actors
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.set.release(&self.actors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_blocks_both_parties() {
        let set = Arc::new(ExclusivitySet::new());
        let _held = set.reserve(1, 2).unwrap();

        assert_eq!(set.reserve(1, 3).unwrap_err(), Party::Instigator);
        assert_eq!(set.reserve(3, 2).unwrap_err(), Party::Target);
        assert_eq!(set.reserve(3, 1).unwrap_err(), Party::Target);
        assert_eq!(set.check(2, 9), Err(Party::Instigator));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let set = Arc::new(ExclusivitySet::new());
        let first = set.reserve(1, 2).unwrap();
        drop(first);
        assert!(set.is_empty());

        let _second = set.reserve(2, 1).unwrap();
        assert!(set.contains(1));
        assert!(set.contains(2));
    }

    #[test]
    fn test_failed_reserve_leaves_set_untouched() {
        let set = Arc::new(ExclusivitySet::new());
        let _held = set.reserve(1, 2).unwrap();
        assert!(set.reserve(3, 2).is_err());
        assert!(!set.contains(3));
        assert_eq!(set.len(), 2);
    }
}
