use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::model::*;

use super::locks::LockSet;
use super::{Engine, EngineError};

/// Move capacity/occupied of every unit in `ids` by the given deltas.
/// Units not in the lock set are skipped.
pub(super) fn shift(set: &mut LockSet, ids: &[Ulid], capacity: i64, occupied: i64) {
    for id in ids {
        if let Some(unit) = set.get_mut(id) {
            unit.capacity = offset(unit.capacity, capacity);
            unit.occupied = offset(unit.occupied, occupied);
        }
    }
}

fn offset(value: u32, delta: i64) -> u32 {
    (i64::from(value) + delta).clamp(0, i64::from(u32::MAX)) as u32
}

/// Read guards over `ids`, taken in ascending order.
async fn read_sorted(engine: &Engine, ids: &[Ulid]) -> Vec<OwnedRwLockReadGuard<UnitState>> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    let mut guards = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(unit) = engine.get_unit_state(&id) {
            guards.push(unit.read_owned().await);
        }
    }
    guards
}

impl Engine {
    // ── Occupancy choke points ───────────────────────────────

    /// Fails if adding `by` would overflow the unit or any ancestor.
    /// Caller holds the unit and its ancestors.
    pub(super) fn ensure_capacity(
        &self,
        set: &LockSet,
        unit_id: &Ulid,
        by: u32,
    ) -> Result<(), EngineError> {
        let mut chain = vec![*unit_id];
        chain.extend(self.ancestors(unit_id));
        for id in chain {
            let unit = set.get(&id).ok_or(EngineError::NotFound(id))?;
            if u64::from(unit.occupied) + u64::from(by) > u64::from(unit.capacity) {
                tracing::error!(
                    "occupancy of {id} would exceed capacity {} ({} + {by})",
                    unit.capacity,
                    unit.occupied
                );
                metrics::counter!(crate::observability::CAPACITY_VIOLATIONS_TOTAL).increment(1);
                return Err(EngineError::CapacityExceeded {
                    unit_id: id,
                    capacity: unit.capacity,
                });
            }
        }
        Ok(())
    }

    /// Add `by` to a leaf and every ancestor rollup. Only reached from hold
    /// finalization, after `ensure_capacity`.
    pub(super) fn increment_occupied(&self, set: &mut LockSet, unit_id: &Ulid, by: u32) {
        let mut chain = vec![*unit_id];
        chain.extend(self.ancestors(unit_id));
        shift(set, &chain, 0, i64::from(by));
    }

    /// Subtract up to `by` from a leaf, clamped at zero, and the same amount
    /// from every ancestor. Returns the amount actually removed.
    pub(super) fn decrement_occupied(&self, set: &mut LockSet, unit_id: &Ulid, by: u32) -> u32 {
        let removed = match set.get(unit_id) {
            Some(unit) => unit.occupied.min(by),
            None => return 0,
        };
        let mut chain = vec![*unit_id];
        chain.extend(self.ancestors(unit_id));
        shift(set, &chain, 0, -i64::from(removed));
        removed
    }

    // ── Reads ────────────────────────────────────────────────

    /// Whether the unit and all its ancestors are listed.
    pub(super) async fn is_offered(&self, unit_id: &Ulid) -> bool {
        let mut chain = vec![*unit_id];
        chain.extend(self.ancestors(unit_id));
        for id in chain {
            let Some(unit) = self.get_unit_state(&id) else {
                return false;
            };
            if !unit.read().await.listed {
                return false;
            }
        }
        true
    }

    pub(super) fn hold_is_active(&self, hold_id: &Ulid, now: Ms) -> bool {
        self.holds.get(hold_id).is_some_and(|h| h.is_active(now))
    }

    /// Never fails: an unknown unit reads as full and reserved.
    pub async fn get_availability(&self, unit_id: Ulid) -> AvailabilitySummary {
        let Some(unit) = self.get_unit_state(&unit_id) else {
            return AvailabilitySummary::unknown(unit_id);
        };
        let now = self.now();
        let snapshot = unit.read().await.clone();
        let offered = self.is_offered(&unit_id).await;

        let is_reserved = if self.has_children(&unit_id) {
            let guards = read_sorted(self, &self.leaves_under(&unit_id)).await;
            guards.iter().any(|leaf| {
                leaf.active_hold
                    .is_some_and(|hid| self.hold_is_active(&hid, now))
            })
        } else {
            snapshot
                .active_hold
                .is_some_and(|hid| self.hold_is_active(&hid, now))
        };

        AvailabilitySummary {
            unit_id,
            kind: Some(snapshot.kind),
            capacity: snapshot.capacity,
            occupied: snapshot.occupied,
            available: if offered { snapshot.available() } else { 0 },
            is_full: snapshot.is_full(),
            is_reserved,
            listed: offered,
        }
    }

    /// Dashboard totals recomputed from the leaves under `unit_id`.
    pub async fn aggregate_summary(&self, unit_id: Ulid) -> Result<AggregateSummary, EngineError> {
        let unit = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let kind = unit.read().await.kind;
        let offered = self.is_offered(&unit_id).await;
        let now = self.now();

        let leaves = read_sorted(self, &self.leaves_under(&unit_id)).await;
        let mut summary = AggregateSummary {
            unit_id,
            kind,
            capacity: 0,
            occupied: 0,
            available: 0,
            leaf_units: leaves.len(),
            reserved_units: 0,
            full_units: 0,
        };
        for leaf in &leaves {
            summary.capacity += leaf.capacity;
            summary.occupied += leaf.occupied;
            if offered {
                summary.available += leaf.available();
            }
            if leaf.is_full() {
                summary.full_units += 1;
            }
            if leaf
                .active_hold
                .is_some_and(|hid| self.hold_is_active(&hid, now))
            {
                summary.reserved_units += 1;
            }
        }
        Ok(summary)
    }

    /// Containers whose stored totals differ from the sum over their leaves.
    pub async fn audit_rollups(&self) -> Vec<RollupDrift> {
        let containers: Vec<Ulid> = self
            .children
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect();

        let mut drift = Vec::new();
        for container_id in containers {
            let leaves = self.leaves_under(&container_id);
            let mut ids = leaves.clone();
            ids.push(container_id);
            let guards = read_sorted(self, &ids).await;

            let Some(container) = guards.iter().find(|g| g.id == container_id) else {
                continue;
            };
            let (mut leaf_capacity, mut leaf_occupied) = (0u32, 0u32);
            for leaf in guards.iter().filter(|g| leaves.contains(&g.id)) {
                leaf_capacity += leaf.capacity;
                leaf_occupied += leaf.occupied;
            }
            if container.capacity != leaf_capacity || container.occupied != leaf_occupied {
                drift.push(RollupDrift {
                    unit_id: container_id,
                    stored_capacity: container.capacity,
                    stored_occupied: container.occupied,
                    leaf_capacity,
                    leaf_occupied,
                });
            }
        }
        drift
    }
}
