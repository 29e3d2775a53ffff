use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::model::UnitState;

use super::{Engine, EngineError};

/// Write guards over a set of units, acquired in ascending id order.
///
/// Every mutating operation takes its whole set in one go and never acquires a
/// second set while holding the first, so overlapping operations serialize
/// without deadlocking.
///
/// A live set also holds the engine's compaction gate for reading, so WAL
/// compaction never snapshots between a mutation's append and its apply.
pub(super) struct LockSet {
    _gate: Option<OwnedRwLockReadGuard<()>>,
    guards: Vec<(Ulid, OwnedRwLockWriteGuard<UnitState>)>,
}

fn sorted_ids(ids: impl IntoIterator<Item = Ulid>) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    ids
}

impl LockSet {
    pub(super) async fn acquire(
        engine: &Engine,
        ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<Self, EngineError> {
        let ids = sorted_ids(ids);
        let gate = engine.compact_gate.clone().read_owned().await;
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = engine.get_unit_state(&id).ok_or(EngineError::NotFound(id))?;
            guards.push((id, unit.write_owned().await));
        }
        Ok(Self {
            _gate: Some(gate),
            guards,
        })
    }

    /// Non-blocking acquisition for replay, where nothing else holds a lock.
    /// Unknown ids are skipped.
    pub(super) fn acquire_uncontended(engine: &Engine, ids: impl IntoIterator<Item = Ulid>) -> Self {
        let ids = sorted_ids(ids);
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(unit) = engine.get_unit_state(&id) {
                let guard = unit.try_write_owned().expect("replay: uncontended write");
                guards.push((id, guard));
            }
        }
        Self {
            _gate: None,
            guards,
        }
    }

    fn position(&self, id: &Ulid) -> Option<usize> {
        self.guards.binary_search_by_key(id, |(gid, _)| *gid).ok()
    }

    pub(super) fn get(&self, id: &Ulid) -> Option<&UnitState> {
        self.position(id).map(|i| &*self.guards[i].1)
    }

    pub(super) fn get_mut(&mut self, id: &Ulid) -> Option<&mut UnitState> {
        self.position(id).map(|i| &mut *self.guards[i].1)
    }

    pub(super) fn ids(&self) -> Vec<Ulid> {
        self.guards.iter().map(|(id, _)| *id).collect()
    }
}
