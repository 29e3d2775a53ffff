use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::observability::PAYOUTS_TOTAL;

use super::locks::LockSet;
use super::{Engine, EngineError};

/// Moves money to a unit owner.
///
/// Called with no unit locks held. A transfer interrupted by a restart is
/// attempted again with the same payout id, so implementations must treat the
/// payout id as an idempotency key.
#[async_trait]
pub trait PayoutProcessor: Send + Sync {
    /// Returns the transfer reference, or a reason for the failure.
    async fn transfer(&self, payout: &Payout) -> Result<String, String>;
}

/// Records payouts for an operator to transfer by hand.
pub struct ManualPayouts;

#[async_trait]
impl PayoutProcessor for ManualPayouts {
    async fn transfer(&self, payout: &Payout) -> Result<String, String> {
        let Some(owner) = payout.owner_id.as_deref() else {
            return Err("no owner on record for this payout".into());
        };
        tracing::info!(
            "payout {} queued for manual transfer: {} cents to {owner}",
            payout.id,
            payout.amount_cents
        );
        Ok(format!("manual-{}", payout.id))
    }
}

impl Payout {
    pub fn begin_processing(&mut self, now: Ms) -> Result<(), EngineError> {
        if self.status != PayoutStatus::Pending {
            return Err(EngineError::InvalidTransition("only a pending payout can be processed"));
        }
        self.status = PayoutStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, transfer_reference: String, now: Ms) -> Result<(), EngineError> {
        if self.status != PayoutStatus::Processing {
            return Err(EngineError::InvalidTransition("payout is not processing"));
        }
        self.status = PayoutStatus::Paid;
        self.transfer_reference = Some(transfer_reference);
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    /// Back to pending for another attempt, or failed once the attempts run out.
    pub fn fail(&mut self, error: String, max_attempts: u32, now: Ms) -> Result<(), EngineError> {
        if self.status != PayoutStatus::Processing {
            return Err(EngineError::InvalidTransition("payout is not processing"));
        }
        self.attempts += 1;
        self.status = if self.attempts >= max_attempts {
            PayoutStatus::Failed
        } else {
            PayoutStatus::Pending
        };
        self.last_error = Some(error);
        self.updated_at = now;
        Ok(())
    }
}

impl Engine {
    /// One settlement pass over every pending payout. Only one pass runs at a
    /// time; a call that finds another in progress returns an empty report.
    pub async fn settle_payouts(
        &self,
        processor: &dyn PayoutProcessor,
        max_attempts: u32,
    ) -> SettlementReport {
        let mut report = SettlementReport::default();
        let Ok(_flight) = self.settle_lock.try_lock() else {
            tracing::debug!("settlement already in progress");
            return report;
        };

        let mut pending: Vec<Payout> = self
            .payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Pending)
            .map(|p| p.clone())
            .collect();
        pending.sort_by_key(|p| p.id);

        for payout in pending {
            let id = payout.id;
            match self.settle_one(processor, payout, max_attempts).await {
                Ok(PayoutStatus::Paid) => report.paid += 1,
                Ok(PayoutStatus::Pending) => report.retried += 1,
                Ok(PayoutStatus::Failed) => report.failed += 1,
                Ok(PayoutStatus::Processing) => {}
                Err(e) => tracing::warn!("settling payout {id} failed: {e}"),
            }
        }
        report
    }

    async fn settle_one(
        &self,
        processor: &dyn PayoutProcessor,
        mut payout: Payout,
        max_attempts: u32,
    ) -> Result<PayoutStatus, EngineError> {
        payout.begin_processing(self.now())?;
        self.persist_payout(&payout).await?;

        let outcome = processor.transfer(&payout).await;
        let now = self.now();
        match outcome {
            Ok(reference) => payout.complete(reference, now)?,
            Err(reason) => {
                tracing::warn!(
                    "payout {} transfer failed (attempt {}): {reason}",
                    payout.id,
                    payout.attempts + 1
                );
                payout.fail(reason, max_attempts, now)?;
            }
        }
        self.persist_payout(&payout).await?;
        metrics::counter!(PAYOUTS_TOTAL, "outcome" => payout.status.as_str()).increment(1);
        if payout.status == PayoutStatus::Failed {
            tracing::error!(
                "payout {} gave up after {} attempts",
                payout.id,
                payout.attempts
            );
        }
        Ok(payout.status)
    }

    async fn persist_payout(&self, payout: &Payout) -> Result<(), EngineError> {
        let mut set = LockSet::acquire(self, Vec::new()).await?;
        let event = Event::PayoutUpdated {
            payout: payout.clone(),
        };
        self.persist_and_apply(&mut set, &event).await
    }

    pub fn get_payout(&self, id: &Ulid) -> Option<Payout> {
        self.payouts.get(id).map(|p| p.clone())
    }

    pub fn payout_for_hold(&self, hold_id: &Ulid) -> Option<Payout> {
        self.payouts
            .iter()
            .find(|p| p.hold_id == *hold_id)
            .map(|p| p.clone())
    }

    /// Payouts, optionally for one owner, oldest first.
    pub fn list_payouts(&self, owner_id: Option<&str>) -> Vec<Payout> {
        let mut out: Vec<Payout> = self
            .payouts
            .iter()
            .filter(|p| owner_id.is_none_or(|o| p.owner_id.as_deref() == Some(o)))
            .map(|p| p.clone())
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }
}
