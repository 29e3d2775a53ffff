use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_unit(&self, id: &Ulid) -> Option<UnitInfo> {
        let unit = self.get_unit_state(id)?;
        let guard = unit.read().await;
        Some(UnitInfo::from(&*guard))
    }

    /// Units directly under `parent_id`, or every unit when `None`. Sorted by id.
    pub async fn list_units(&self, parent_id: Option<Ulid>) -> Vec<UnitInfo> {
        let mut ids: Vec<Ulid> = match parent_id {
            Some(pid) => self
                .children
                .get(&pid)
                .map(|kids| kids.value().clone())
                .unwrap_or_default(),
            None => self.units.iter().map(|e| *e.key()).collect(),
        };
        ids.sort();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.get_unit(&id).await {
                out.push(info);
            }
        }
        out
    }

    pub fn get_hold(&self, id: &Ulid) -> Option<Hold> {
        self.holds.get(id).map(|h| h.clone())
    }

    /// Holds touching the unit: on it, on a leaf under it, or on a container
    /// above it. Oldest first.
    pub fn holds_for_unit(&self, unit_id: &Ulid) -> Vec<Hold> {
        let leaves = self.leaves_under(unit_id);
        let mut out: Vec<Hold> = self
            .holds
            .iter()
            .filter(|h| h.target.id == *unit_id || h.covered.iter().any(|c| leaves.contains(c)))
            .map(|h| h.clone())
            .collect();
        out.sort_by_key(|h| (h.created_at, h.id));
        out
    }

    pub fn holds_for_user(&self, user_id: &str) -> Vec<Hold> {
        let mut out: Vec<Hold> = self
            .holds
            .iter()
            .filter(|h| h.user_id == user_id)
            .map(|h| h.clone())
            .collect();
        out.sort_by_key(|h| (h.created_at, h.id));
        out
    }

    /// Active holds covering any of `leaves`, newest first.
    pub(super) fn open_holds_covering(&self, leaves: &[Ulid], now: Ms) -> Vec<Hold> {
        let mut out: Vec<Hold> = self
            .holds
            .iter()
            .filter(|h| h.is_active(now) && h.covered.iter().any(|c| leaves.contains(c)))
            .map(|h| h.clone())
            .collect();
        out.sort_by_key(|h| std::cmp::Reverse((h.created_at, h.id)));
        out
    }
}
