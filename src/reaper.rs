use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, PayoutProcessor};
use crate::model::Ms;

/// Background task that expires lapsed holds.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = engine.expire_stale_holds().await;
        if expired > 0 {
            info!("expired {expired} lapsed holds");
        }
    }
}

/// Background task that hands pending payouts to the processor.
pub async fn run_settlement(
    engine: Arc<Engine>,
    processor: Arc<dyn PayoutProcessor>,
    every: Duration,
    max_attempts: u32,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let report = engine.settle_payouts(processor.as_ref(), max_attempts).await;
        if report.paid + report.retried + report.failed > 0 {
            info!(
                "settlement: {} paid, {} to retry, {} failed",
                report.paid, report.retried, report.failed
            );
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate, and
/// audits the container rollups while it is at it.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, hold_retention_ms: Ms) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal(hold_retention_ms).await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
        for drift in engine.audit_rollups().await {
            tracing::error!(
                "rollup drift on {}: stored {}/{}, leaves {}/{}",
                drift.unit_id,
                drift.stored_occupied,
                drift.stored_capacity,
                drift.leaf_occupied,
                drift.leaf_capacity
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::ManualPayouts;
    use crate::limits::MINUTE_MS;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomhold_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_bed(name: &str) -> (Arc<Engine>, Arc<ManualClock>, Ulid) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let notify = Arc::new(NotifyHub::new());
        let engine =
            Arc::new(Engine::with_clock(test_wal_path(name), notify, clock.clone()).unwrap());

        let (building, room) = (Ulid::new(), Ulid::new());
        engine
            .create_unit(UnitSpec::new(building, UnitKind::Building, None, 0).owner("landlord"))
            .await
            .unwrap();
        engine
            .create_unit(UnitSpec::new(room, UnitKind::Room, Some(building), 1).price(45_000))
            .await
            .unwrap();
        (engine, clock, room)
    }

    #[tokio::test]
    async fn reaper_expires_lapsed_holds() {
        let (engine, clock, room) = engine_with_bed("reaper_expire.wal").await;
        let hold = engine
            .create_hold(Ulid::new(), room, "student", 30)
            .await
            .unwrap();

        tokio::spawn(run_reaper(engine.clone(), Duration::from_millis(10)));
        clock.advance(31 * MINUTE_MS);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let after = engine.get_hold(&hold.id).unwrap();
        assert_eq!(after.status, HoldStatus::Expired);
        assert!(!engine.get_availability(room).await.is_reserved);
    }

    #[tokio::test]
    async fn settlement_task_pays_out() {
        let (engine, _clock, room) = engine_with_bed("reaper_settle.wal").await;
        let hold = engine
            .create_hold(Ulid::new(), room, "student", 30)
            .await
            .unwrap();
        let payout = engine.finalize_hold(hold.id, "pay_123").await.unwrap();

        tokio::spawn(run_settlement(
            engine.clone(),
            Arc::new(ManualPayouts),
            Duration::from_millis(10),
            5,
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let settled = engine.get_payout(&payout.id).unwrap();
        assert_eq!(settled.status, PayoutStatus::Paid);
        assert_eq!(settled.owner_id.as_deref(), Some("landlord"));
        assert_eq!(settled.amount_cents, 45_000);
    }
}
