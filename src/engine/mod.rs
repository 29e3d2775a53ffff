mod conflict;
mod error;
mod holds;
mod ledger;
mod locks;
mod mutations;
mod payouts;
mod queries;

pub use conflict::{format_time_remaining, watch_conflict};
pub use error::EngineError;
pub use payouts::{ManualPayouts, PayoutProcessor};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::MAX_HIERARCHY_DEPTH;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use locks::LockSet;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Blocks for the first append, drains whatever else is already
/// queued, writes the batch, fsyncs once and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush what we have before compaction or counters see the log.
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no half-written batch leaks into the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The reservation core for one tenant: inventory ledger, holds, payouts.
pub struct Engine {
    units: DashMap<Ulid, SharedUnitState>,
    holds: DashMap<Ulid, Hold>,
    payouts: DashMap<Ulid, Payout>,
    /// child → parent
    parents: DashMap<Ulid, Ulid>,
    /// parent → children
    children: DashMap<Ulid, Vec<Ulid>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    /// Read by every live lock set, written by compaction.
    compact_gate: Arc<RwLock<()>>,
    /// Keeps payout settlement single-flight.
    settle_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            units: DashMap::new(),
            holds: DashMap::new(),
            payouts: DashMap::new(),
            parents: DashMap::new(),
            children: DashMap::new(),
            wal_tx,
            notify,
            clock,
            compact_gate: Arc::new(RwLock::new(())),
            settle_lock: tokio::sync::Mutex::new(()),
        };

        // Sole owner of every lock here, so acquisition never waits. Never block
        // on a lock in this loop: tenants are created lazily inside async code.
        for event in &events {
            let mut set = LockSet::acquire_uncontended(&engine, engine.lock_ids(event));
            engine.apply_event(&mut set, event);
        }

        // A transfer interrupted mid-flight is retried; processors key on payout id.
        for mut payout in engine.payouts.iter_mut() {
            if payout.status == PayoutStatus::Processing {
                payout.status = PayoutStatus::Pending;
            }
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events: {} units, {} holds, {} payouts",
                events.len(),
                engine.units.len(),
                engine.holds.len(),
                engine.payouts.len()
            );
        }

        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply under the held locks, then publish to every touched
    /// unit and its ancestors.
    async fn persist_and_apply(&self, set: &mut LockSet, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let mut touched = set.ids();
        if let Event::UnitCreated { id, .. } = event {
            touched.push(*id);
        }
        self.apply_event(set, event);
        for id in self.with_ancestors(&touched) {
            self.notify.send(id, event);
        }
        Ok(())
    }

    /// Units whose locks an event needs when it is applied.
    fn lock_ids(&self, event: &Event) -> Vec<Ulid> {
        match event {
            Event::UnitCreated { parent_id, .. } => parent_id
                .map(|pid| self.with_ancestors(&[pid]))
                .unwrap_or_default(),
            Event::UnitUpdated { id, .. }
            | Event::UnitDeleted { id }
            | Event::OccupancyRestored { unit_id: id, .. } => self.with_ancestors(&[*id]),
            Event::HoldPlaced { hold } => hold.covered.clone(),
            Event::HoldCancelled { id, .. } | Event::HoldExpired { id, .. } => self.hold_covered(id),
            Event::HoldFinalized { id, .. } | Event::HoldCheckedOut { id, .. } => {
                self.with_ancestors(&self.hold_covered(id))
            }
            Event::HoldPaymentStarted { .. } | Event::PayoutUpdated { .. } => Vec::new(),
        }
    }

    /// Apply an already-persisted event. Caller holds `lock_ids(event)`.
    fn apply_event(&self, set: &mut LockSet, event: &Event) {
        match event {
            Event::UnitCreated {
                id,
                kind,
                parent_id,
                name,
                owner_id,
                price_cents,
                capacity,
                listed,
            } => {
                if let Some(pid) = parent_id {
                    let above = self.ancestors(pid);
                    if !self.has_children(pid) {
                        // First child: the parent's own capacity gives way to the rollup.
                        let own = set.get_mut(pid).map(|parent| {
                            let own = parent.capacity;
                            parent.capacity = 0;
                            parent.active_hold = None;
                            own
                        });
                        if let Some(own) = own {
                            ledger::shift(set, &above, -i64::from(own), 0);
                        }
                    }
                    let mut chain = vec![*pid];
                    chain.extend(above);
                    ledger::shift(set, &chain, i64::from(*capacity), 0);
                    self.parents.insert(*id, *pid);
                    self.children.entry(*pid).or_default().push(*id);
                }
                let mut state = UnitState::new(&UnitSpec {
                    id: *id,
                    kind: *kind,
                    parent_id: *parent_id,
                    capacity: *capacity,
                    owner_id: owner_id.clone(),
                    price_cents: *price_cents,
                    name: name.clone(),
                });
                state.listed = *listed;
                self.units.insert(*id, Arc::new(RwLock::new(state)));
            }
            Event::UnitUpdated {
                id,
                name,
                price_cents,
                capacity,
                listed,
            } => {
                let delta = set.get_mut(id).map(|unit| {
                    let delta = i64::from(*capacity) - i64::from(unit.capacity);
                    unit.name = name.clone();
                    unit.price_cents = *price_cents;
                    unit.capacity = *capacity;
                    unit.listed = *listed;
                    delta
                });
                if let Some(delta) = delta
                    && delta != 0
                {
                    ledger::shift(set, &self.ancestors(id), delta, 0);
                }
            }
            Event::UnitDeleted { id } => {
                let counters = set.get(id).map(|u| (u.capacity, u.occupied));
                if let Some((capacity, occupied)) = counters {
                    ledger::shift(
                        set,
                        &self.ancestors(id),
                        -i64::from(capacity),
                        -i64::from(occupied),
                    );
                }
                if let Some((_, pid)) = self.parents.remove(id)
                    && let Some(mut kids) = self.children.get_mut(&pid)
                {
                    kids.retain(|c| c != id);
                }
                self.children.remove(id);
                self.units.remove(id);
            }
            Event::HoldPlaced { hold } => {
                if hold.status.is_open() {
                    for leaf in &hold.covered {
                        if let Some(unit) = set.get_mut(leaf) {
                            unit.active_hold = Some(hold.id);
                        }
                    }
                }
                self.holds.insert(hold.id, hold.clone());
            }
            Event::HoldPaymentStarted { id, .. } => {
                if let Some(mut hold) = self.holds.get_mut(id) {
                    hold.status = HoldStatus::Pending;
                }
            }
            Event::HoldFinalized {
                id,
                payment_reference,
                at,
                payout,
            } => {
                let covered = self.holds.get_mut(id).map(|mut hold| {
                    hold.status = HoldStatus::Paid;
                    hold.payment_reference = Some(payment_reference.clone());
                    hold.finalized_at = Some(*at);
                    hold.covered.clone()
                });
                for leaf in covered.unwrap_or_default() {
                    self.increment_occupied(set, &leaf, 1);
                    release_leaf(set, &leaf, id);
                }
                self.payouts.insert(payout.id, payout.clone());
            }
            Event::HoldCancelled { id, at } | Event::HoldExpired { id, at } => {
                let status = if matches!(event, Event::HoldCancelled { .. }) {
                    HoldStatus::Cancelled
                } else {
                    HoldStatus::Expired
                };
                let covered = self.holds.get_mut(id).map(|mut hold| {
                    hold.status = status;
                    hold.closed_at = Some(*at);
                    hold.covered.clone()
                });
                for leaf in covered.unwrap_or_default() {
                    release_leaf(set, &leaf, id);
                }
            }
            Event::HoldCheckedOut { id, at } => {
                let covered = self.holds.get_mut(id).map(|mut hold| {
                    hold.checked_out_at = Some(*at);
                    hold.covered.clone()
                });
                for leaf in covered.unwrap_or_default() {
                    self.decrement_occupied(set, &leaf, 1);
                }
            }
            Event::PayoutUpdated { payout } => {
                self.payouts.insert(payout.id, payout.clone());
            }
            Event::OccupancyRestored { unit_id, occupied } => {
                let delta = set.get_mut(unit_id).map(|unit| {
                    let delta = i64::from(*occupied) - i64::from(unit.occupied);
                    unit.occupied = *occupied;
                    delta
                });
                if let Some(delta) = delta {
                    ledger::shift(set, &self.ancestors(unit_id), 0, delta);
                }
            }
        }
    }

    // ── Topology ─────────────────────────────────────────────

    pub(crate) fn get_unit_state(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.units.get(id).map(|e| e.value().clone())
    }

    fn has_children(&self, id: &Ulid) -> bool {
        self.children.get(id).is_some_and(|kids| !kids.is_empty())
    }

    /// Parent first, root last.
    fn ancestors(&self, id: &Ulid) -> Vec<Ulid> {
        let mut out = Vec::new();
        let mut cur = self.parents.get(id).map(|p| *p.value());
        while let Some(pid) = cur {
            if out.len() >= MAX_HIERARCHY_DEPTH {
                break;
            }
            out.push(pid);
            cur = self.parents.get(&pid).map(|p| *p.value());
        }
        out
    }

    fn with_ancestors(&self, ids: &[Ulid]) -> Vec<Ulid> {
        let mut out: Vec<Ulid> = ids.to_vec();
        for id in ids {
            out.extend(self.ancestors(id));
        }
        out.sort();
        out.dedup();
        out
    }

    /// Leaf descendants of `id`, or `id` itself when it has no children. Sorted.
    fn leaves_under(&self, id: &Ulid) -> Vec<Ulid> {
        let mut leaves = Vec::new();
        let mut stack = vec![*id];
        while let Some(cur) = stack.pop() {
            let kids = self
                .children
                .get(&cur)
                .map(|k| k.value().clone())
                .unwrap_or_default();
            if kids.is_empty() {
                leaves.push(cur);
            } else {
                stack.extend(kids);
            }
        }
        leaves.sort();
        leaves
    }

    fn hold_covered(&self, hold_id: &Ulid) -> Vec<Ulid> {
        self.holds
            .get(hold_id)
            .map(|h| h.covered.clone())
            .unwrap_or_default()
    }
}

/// Clear a leaf's hold pointer if it still points at `hold_id`.
fn release_leaf(set: &mut LockSet, leaf: &Ulid, hold_id: &Ulid) {
    if let Some(unit) = set.get_mut(leaf)
        && unit.active_hold == Some(*hold_id)
    {
        unit.active_hold = None;
    }
}
