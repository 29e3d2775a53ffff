use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use ulid::Ulid;

use crate::model::*;

use super::Engine;

/// `MM:SS`, or `H:MM:SS` from one hour up. Negative input reads as zero.
pub fn format_time_remaining(remaining_ms: Ms) -> String {
    let total = remaining_ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

impl Engine {
    /// Whether someone currently holds the unit (or anything under it), and for
    /// how long. Advisory: create and finalize re-check under their locks.
    pub fn check_conflict(&self, unit_id: Ulid) -> ConflictInfo {
        if !self.units.contains_key(&unit_id) {
            return ConflictInfo::none(unit_id);
        }
        let now = self.now();
        let leaves = self.leaves_under(&unit_id);
        let Some(hold) = self.open_holds_covering(&leaves, now).into_iter().next() else {
            return ConflictInfo::none(unit_id);
        };
        let remaining_ms = hold.expires_at - now;
        ConflictInfo {
            unit_id,
            has_conflict: true,
            hold_id: Some(hold.id),
            expires_at: Some(hold.expires_at),
            remaining_ms: Some(remaining_ms),
            time_remaining: Some(format_time_remaining(remaining_ms)),
        }
    }
}

/// Live conflict view for one unit. Re-evaluated on every event published for
/// the unit and on every `poll` tick; the task ends once the receiver is dropped.
pub fn watch_conflict(
    engine: Arc<Engine>,
    unit_id: Ulid,
    poll: Duration,
) -> watch::Receiver<ConflictInfo> {
    let mut events = engine.notify.subscribe(unit_id);
    let (tx, rx) = watch::channel(engine.check_conflict(unit_id));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        ticker.tick().await;
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => {}
                _ = tx.closed() => break,
            }
            if tx.send(engine.check_conflict(unit_id)).is_err() {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_formats() {
        assert_eq!(format_time_remaining(0), "00:00");
        assert_eq!(format_time_remaining(59_999), "00:59");
        assert_eq!(format_time_remaining(29 * 60_000 + 5_000), "29:05");
        assert_eq!(format_time_remaining(3_600_000), "1:00:00");
        assert_eq!(format_time_remaining(2 * 3_600_000 + 61_000), "2:01:01");
        assert_eq!(format_time_remaining(-5_000), "00:00");
    }
}
