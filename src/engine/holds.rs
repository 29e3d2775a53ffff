use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{HOLDS_CREATED_TOTAL, HOLDS_EXPIRED_TOTAL};

use super::locks::LockSet;
use super::{Engine, EngineError};

fn validate_user(user_id: &str) -> Result<(), EngineError> {
    if user_id.is_empty() {
        return Err(EngineError::InvalidInput("user id required"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

fn record_outcome(result: &Result<Hold, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(EngineError::HoldConflict { .. }) => "conflict",
        Err(EngineError::UnitUnavailable(_)) => "unavailable",
        Err(_) => "error",
    };
    metrics::counter!(HOLDS_CREATED_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    /// Units of `ids` that still exist. Leaves under a stale hold may have been
    /// deleted since the hold was placed.
    fn existing(&self, ids: &[Ulid]) -> Vec<Ulid> {
        ids.iter()
            .filter(|id| self.units.contains_key(id))
            .copied()
            .collect()
    }

    fn hold_snapshot(&self, hold_id: &Ulid) -> Result<Hold, EngineError> {
        self.holds
            .get(hold_id)
            .map(|h| h.clone())
            .ok_or(EngineError::NotFound(*hold_id))
    }

    /// Owner of the nearest unit in the chain that names one.
    async fn resolve_owner(&self, unit_id: &Ulid) -> Option<String> {
        let mut chain = vec![*unit_id];
        chain.extend(self.ancestors(unit_id));
        for id in chain {
            if let Some(unit) = self.get_unit_state(&id)
                && let Some(owner) = unit.read().await.owner_id.clone()
            {
                return Some(owner);
            }
        }
        None
    }

    /// Place a time-boxed hold on a unit. A container is held whole: every leaf
    /// under it must be free or nothing is held.
    pub async fn create_hold(
        &self,
        hold_id: Ulid,
        unit_id: Ulid,
        user_id: &str,
        hold_minutes: u32,
    ) -> Result<Hold, EngineError> {
        let result = self
            .create_hold_inner(hold_id, unit_id, user_id, hold_minutes)
            .await;
        record_outcome(&result);
        result
    }

    async fn create_hold_inner(
        &self,
        hold_id: Ulid,
        unit_id: Ulid,
        user_id: &str,
        hold_minutes: u32,
    ) -> Result<Hold, EngineError> {
        validate_user(user_id)?;
        if !(MIN_HOLD_MINUTES..=MAX_HOLD_MINUTES).contains(&hold_minutes) {
            return Err(EngineError::LimitExceeded("hold minutes out of range"));
        }
        if self.holds.contains_key(&hold_id) {
            return Err(EngineError::AlreadyExists(hold_id));
        }

        let target = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let (target_ref, target_price) = {
            let t = target.read().await;
            (t.unit_ref(), t.price_cents)
        };
        if !target_ref.kind.is_letable() {
            return Err(EngineError::NotLetable(unit_id));
        }

        let covered = self.leaves_under(&unit_id);
        if covered.len() > MAX_COVERED_UNITS {
            return Err(EngineError::LimitExceeded("too many units under one hold"));
        }
        // Listing is an owner switch on the unit or anything above it.
        for leaf in &covered {
            if !self.is_offered(leaf).await {
                return Err(EngineError::UnitUnavailable(*leaf));
            }
        }
        let owner_id = self.resolve_owner(&unit_id).await;

        let mut set = LockSet::acquire(self, covered.iter().copied()).await?;
        if self.holds.contains_key(&hold_id) {
            return Err(EngineError::AlreadyExists(hold_id));
        }
        let now = self.now();

        for leaf in &covered {
            let unit = set.get(leaf).ok_or(EngineError::NotFound(*leaf))?;
            if unit.available() == 0 {
                return Err(EngineError::UnitUnavailable(*leaf));
            }
        }
        for leaf in &covered {
            let unit = set.get(leaf).ok_or(EngineError::NotFound(*leaf))?;
            if let Some(hid) = unit.active_hold
                && let Some(existing) = self.holds.get(&hid)
                && existing.is_active(now)
            {
                return Err(EngineError::HoldConflict {
                    unit_id: *leaf,
                    hold_id: hid,
                    expires_at: existing.expires_at,
                });
            }
        }

        let amount_cents = match target_price {
            Some(price) => price,
            None => covered
                .iter()
                .filter_map(|leaf| set.get(leaf).and_then(|u| u.price_cents))
                .try_fold(0u64, u64::checked_add)
                .ok_or(EngineError::LimitExceeded("hold price too large"))?,
        };
        let hold = Hold {
            id: hold_id,
            target: target_ref,
            covered,
            user_id: user_id.to_string(),
            owner_id,
            amount_cents,
            status: HoldStatus::PendingPayment,
            created_at: now,
            expires_at: now + i64::from(hold_minutes) * MINUTE_MS,
            payment_reference: None,
            finalized_at: None,
            closed_at: None,
            checked_out_at: None,
        };
        let event = Event::HoldPlaced { hold: hold.clone() };
        self.persist_and_apply(&mut set, &event).await?;
        Ok(hold)
    }

    /// The requester has started paying. Does not extend the hold.
    pub async fn start_payment(&self, hold_id: Ulid, user_id: &str) -> Result<Hold, EngineError> {
        let snapshot = self.hold_snapshot(&hold_id)?;
        let mut set = LockSet::acquire(self, self.existing(&snapshot.covered)).await?;
        let hold = self.hold_snapshot(&hold_id)?;
        if hold.user_id != user_id {
            return Err(EngineError::NotAuthorized("only the requester may pay for a hold"));
        }
        match hold.status {
            HoldStatus::Expired => return Err(EngineError::HoldExpired(hold_id)),
            HoldStatus::Paid | HoldStatus::Cancelled => {
                return Err(EngineError::InvalidTransition("hold is closed"));
            }
            HoldStatus::PendingPayment | HoldStatus::Pending => {}
        }
        let now = self.now();
        if hold.is_stale(now) {
            return Err(EngineError::HoldExpired(hold_id));
        }
        if hold.status == HoldStatus::Pending {
            return Ok(hold);
        }

        let event = Event::HoldPaymentStarted { id: hold_id, at: now };
        self.persist_and_apply(&mut set, &event).await?;
        self.hold_snapshot(&hold_id)
    }

    /// Payment confirmed: the hold becomes occupancy and a payout is owed.
    /// Retrying with the same payment reference returns the same payout.
    pub async fn finalize_hold(
        &self,
        hold_id: Ulid,
        payment_reference: &str,
    ) -> Result<Payout, EngineError> {
        if payment_reference.is_empty() {
            return Err(EngineError::InvalidInput("payment reference required"));
        }
        if payment_reference.len() > MAX_PAYMENT_REFERENCE_LEN {
            return Err(EngineError::LimitExceeded("payment reference too long"));
        }
        let snapshot = self.hold_snapshot(&hold_id)?;
        let lock_ids = self.with_ancestors(&self.existing(&snapshot.covered));
        let mut set = LockSet::acquire(self, lock_ids).await?;

        let hold = self.hold_snapshot(&hold_id)?;
        match hold.status {
            HoldStatus::Paid => {
                if hold.payment_reference.as_deref() != Some(payment_reference) {
                    return Err(EngineError::InvalidTransition(
                        "hold already paid under another payment reference",
                    ));
                }
                return self
                    .payout_for_hold(&hold_id)
                    .ok_or(EngineError::NotFound(hold_id));
            }
            HoldStatus::Cancelled => {
                return Err(EngineError::InvalidTransition("hold was cancelled"));
            }
            HoldStatus::Expired => return Err(EngineError::HoldExpired(hold_id)),
            HoldStatus::PendingPayment | HoldStatus::Pending => {}
        }
        let now = self.now();
        if hold.is_stale(now) {
            return Err(EngineError::HoldExpired(hold_id));
        }

        for leaf in &hold.covered {
            self.ensure_capacity(&set, leaf, 1)?;
        }

        let payout = Payout {
            id: Ulid::new(),
            hold_id,
            owner_id: hold.owner_id.clone(),
            amount_cents: hold.amount_cents,
            status: PayoutStatus::Pending,
            attempts: 0,
            last_error: None,
            transfer_reference: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::HoldFinalized {
            id: hold_id,
            payment_reference: payment_reference.to_string(),
            at: now,
            payout: payout.clone(),
        };
        self.persist_and_apply(&mut set, &event).await?;
        tracing::info!(
            "hold {hold_id} paid: {} units, payout {} of {} cents",
            hold.covered.len(),
            payout.id,
            payout.amount_cents
        );
        Ok(payout)
    }

    /// Withdraw an active hold. Only the requester may do this.
    pub async fn cancel_hold(&self, hold_id: Ulid, user_id: &str) -> Result<Hold, EngineError> {
        let snapshot = self.hold_snapshot(&hold_id)?;
        let mut set = LockSet::acquire(self, self.existing(&snapshot.covered)).await?;
        let hold = self.hold_snapshot(&hold_id)?;
        if hold.user_id != user_id {
            return Err(EngineError::NotAuthorized("only the requester may cancel a hold"));
        }
        let now = self.now();
        match hold.status {
            HoldStatus::Expired => return Err(EngineError::HoldExpired(hold_id)),
            HoldStatus::Paid | HoldStatus::Cancelled => {
                return Err(EngineError::InvalidTransition("hold is not active"));
            }
            HoldStatus::PendingPayment | HoldStatus::Pending if hold.is_stale(now) => {
                return Err(EngineError::HoldExpired(hold_id));
            }
            HoldStatus::PendingPayment | HoldStatus::Pending => {}
        }

        let event = Event::HoldCancelled { id: hold_id, at: now };
        self.persist_and_apply(&mut set, &event).await?;
        self.hold_snapshot(&hold_id)
    }

    /// Release the occupancy of a paid hold. Requester or owner.
    pub async fn check_out(&self, hold_id: Ulid, user_id: &str) -> Result<Hold, EngineError> {
        let snapshot = self.hold_snapshot(&hold_id)?;
        let lock_ids = self.with_ancestors(&self.existing(&snapshot.covered));
        let mut set = LockSet::acquire(self, lock_ids).await?;

        let hold = self.hold_snapshot(&hold_id)?;
        if hold.user_id != user_id && hold.owner_id.as_deref() != Some(user_id) {
            return Err(EngineError::NotAuthorized(
                "only the requester or the owner may check out",
            ));
        }
        if hold.status != HoldStatus::Paid {
            return Err(EngineError::InvalidTransition("only a paid hold can be checked out"));
        }
        if hold.checked_out_at.is_some() {
            return Err(EngineError::InvalidTransition("hold already checked out"));
        }

        let event = Event::HoldCheckedOut {
            id: hold_id,
            at: self.now(),
        };
        self.persist_and_apply(&mut set, &event).await?;
        self.hold_snapshot(&hold_id)
    }

    /// Move every open hold past its expiry to `expired`. Each hold is
    /// re-checked under its unit locks, so racing a finalize or a second sweep
    /// is harmless. Returns how many holds this call expired.
    pub async fn expire_stale_holds(&self) -> usize {
        let now = self.now();
        let stale: Vec<(Ulid, Vec<Ulid>)> = self
            .holds
            .iter()
            .filter(|h| h.is_stale(now))
            .map(|h| (h.id, h.covered.clone()))
            .collect();

        let mut expired = 0;
        for (hold_id, covered) in stale {
            match self.expire_one(hold_id, &covered).await {
                Ok(true) => expired += 1,
                Ok(false) => tracing::debug!("hold {hold_id} settled before the sweep reached it"),
                Err(e) => tracing::warn!("failed to expire hold {hold_id}: {e}"),
            }
        }
        if expired > 0 {
            metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(expired as u64);
        }
        expired
    }

    async fn expire_one(&self, hold_id: Ulid, covered: &[Ulid]) -> Result<bool, EngineError> {
        let mut set = LockSet::acquire(self, self.existing(covered)).await?;
        let now = self.now();
        let still_stale = self.holds.get(&hold_id).is_some_and(|h| h.is_stale(now));
        if !still_stale {
            return Ok(false);
        }
        let event = Event::HoldExpired { id: hold_id, at: now };
        self.persist_and_apply(&mut set, &event).await?;
        Ok(true)
    }
}
