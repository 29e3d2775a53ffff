use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::locks::LockSet;
use super::{Engine, EngineError, WalCommand};

fn validate_capacity(kind: UnitKind, capacity: u32) -> Result<(), EngineError> {
    if capacity > MAX_UNIT_CAPACITY {
        return Err(EngineError::LimitExceeded("unit capacity too large"));
    }
    match kind {
        UnitKind::Building if capacity != 0 => Err(EngineError::InvalidInput(
            "a building has no capacity of its own",
        )),
        UnitKind::Building => Ok(()),
        _ if capacity == 0 => Err(EngineError::InvalidInput("capacity must be at least 1")),
        _ => Ok(()),
    }
}

fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("unit name too long"));
    }
    Ok(())
}

fn validate_price(price_cents: Option<u64>) -> Result<(), EngineError> {
    match price_cents {
        Some(p) if p > MAX_PRICE_CENTS => Err(EngineError::LimitExceeded("price too large")),
        _ => Ok(()),
    }
}

impl Engine {
    pub async fn create_unit(&self, spec: UnitSpec) -> Result<(), EngineError> {
        if self.units.len() >= MAX_UNITS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many units"));
        }
        validate_name(&spec.name)?;
        validate_price(spec.price_cents)?;
        if let Some(ref o) = spec.owner_id
            && o.len() > MAX_OWNER_ID_LEN
        {
            return Err(EngineError::LimitExceeded("owner id too long"));
        }
        validate_capacity(spec.kind, spec.capacity)?;
        if self.units.contains_key(&spec.id) {
            return Err(EngineError::AlreadyExists(spec.id));
        }

        let mut lock_ids = Vec::new();
        if let Some(pid) = spec.parent_id {
            if pid == spec.id {
                return Err(EngineError::InvalidParent(spec.id));
            }
            let parent = self.get_unit_state(&pid).ok_or(EngineError::NotFound(pid))?;
            let parent_kind = parent.read().await.kind;
            if !spec.kind.accepts_parent(Some(parent_kind)) {
                return Err(EngineError::InvalidParent(spec.id));
            }
            lock_ids = self.with_ancestors(&[pid]);
            if lock_ids.len() >= MAX_HIERARCHY_DEPTH {
                return Err(EngineError::LimitExceeded("hierarchy too deep"));
            }
        } else if !spec.kind.accepts_parent(None) {
            return Err(EngineError::InvalidParent(spec.id));
        }

        let mut set = LockSet::acquire(self, lock_ids).await?;
        if self.units.contains_key(&spec.id) {
            return Err(EngineError::AlreadyExists(spec.id));
        }
        if let Some(pid) = spec.parent_id
            && !self.has_children(&pid)
        {
            let parent = set.get(&pid).ok_or(EngineError::NotFound(pid))?;
            let held = parent
                .active_hold
                .is_some_and(|hid| self.hold_is_active(&hid, self.now()));
            if parent.occupied > 0 || held {
                return Err(EngineError::InvalidTransition(
                    "unit is occupied or held and cannot be subdivided",
                ));
            }
        }

        let event = Event::UnitCreated {
            id: spec.id,
            kind: spec.kind,
            parent_id: spec.parent_id,
            name: spec.name,
            owner_id: spec.owner_id,
            price_cents: spec.price_cents,
            capacity: spec.capacity,
            listed: true,
        };
        self.persist_and_apply(&mut set, &event).await
    }

    pub async fn update_unit(&self, id: Ulid, patch: UnitPatch) -> Result<(), EngineError> {
        validate_name(&patch.name)?;
        validate_price(patch.price_cents)?;
        if !self.units.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let mut set = LockSet::acquire(self, self.with_ancestors(&[id])).await?;
        let unit = set.get(&id).ok_or(EngineError::NotFound(id))?;

        let capacity = match patch.capacity {
            Some(_) if self.has_children(&id) => {
                return Err(EngineError::InvalidInput(
                    "capacity of a container is the sum of its units",
                ));
            }
            Some(c) => {
                validate_capacity(unit.kind, c)?;
                if c < unit.occupied {
                    return Err(EngineError::InvalidInput("capacity below current occupancy"));
                }
                c
            }
            None => unit.capacity,
        };

        let event = Event::UnitUpdated {
            id,
            name: patch.name.or_else(|| unit.name.clone()),
            price_cents: patch.price_cents.or(unit.price_cents),
            capacity,
            listed: patch.listed.unwrap_or(unit.listed),
        };
        self.persist_and_apply(&mut set, &event).await
    }

    pub async fn delete_unit(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.units.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.has_children(&id) {
            return Err(EngineError::HasChildren(id));
        }
        let mut set = LockSet::acquire(self, self.with_ancestors(&[id])).await?;
        if self.has_children(&id) {
            return Err(EngineError::HasChildren(id));
        }
        let unit = set.get(&id).ok_or(EngineError::NotFound(id))?;
        if unit.occupied > 0 {
            return Err(EngineError::InvalidTransition("unit is occupied"));
        }
        if let Some(hid) = unit.active_hold
            && let Some(hold) = self.holds.get(&hid)
            && hold.is_active(self.now())
        {
            return Err(EngineError::HoldConflict {
                unit_id: id,
                hold_id: hid,
                expires_at: hold.expires_at,
            });
        }

        let event = Event::UnitDeleted { id };
        self.persist_and_apply(&mut set, &event).await
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    /// Terminal holds closed more than `hold_retention_ms` ago are dropped.
    pub async fn compact_wal(&self, hold_retention_ms: Ms) -> Result<(), EngineError> {
        // No mutation can be between its append and its apply while this is held.
        let _gate = self.compact_gate.write().await;
        let cutoff = self.now() - hold_retention_ms;

        let mut units = Vec::with_capacity(self.units.len());
        let unit_states: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        for unit in unit_states {
            units.push(unit.read().await.clone());
        }
        // Parents before children.
        units.sort_by_key(|u| (self.ancestors(&u.id).len(), u.id));

        let mut events = Vec::new();
        for u in &units {
            let container = self.has_children(&u.id);
            events.push(Event::UnitCreated {
                id: u.id,
                kind: u.kind,
                parent_id: u.parent_id,
                name: u.name.clone(),
                owner_id: u.owner_id.clone(),
                price_cents: u.price_cents,
                capacity: if container { 0 } else { u.capacity },
                listed: u.listed,
            });
        }
        for u in &units {
            if !self.has_children(&u.id) && u.occupied > 0 {
                events.push(Event::OccupancyRestored {
                    unit_id: u.id,
                    occupied: u.occupied,
                });
            }
        }

        let mut holds: Vec<Hold> = self
            .holds
            .iter()
            .map(|e| e.value().clone())
            .filter(|h| match retired_at(h) {
                Some(at) => at > cutoff,
                None => true,
            })
            .collect();
        holds.sort_by_key(|h| (h.created_at, h.id));
        let dropped = self.holds.len() - holds.len();
        events.extend(holds.into_iter().map(|hold| Event::HoldPlaced { hold }));

        let mut payouts: Vec<Payout> = self.payouts.iter().map(|e| e.value().clone()).collect();
        payouts.sort_by_key(|p| p.id);
        events.extend(payouts.into_iter().map(|payout| Event::PayoutUpdated { payout }));

        tracing::debug!("compacting to {} events ({dropped} retired holds dropped)", events.len());

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// When a hold stopped mattering: closed, or paid and checked out.
fn retired_at(hold: &Hold) -> Option<Ms> {
    match hold.status {
        HoldStatus::Cancelled | HoldStatus::Expired => hold.closed_at,
        HoldStatus::Paid => hold.checked_out_at,
        HoldStatus::PendingPayment | HoldStatus::Pending => None,
    }
}
