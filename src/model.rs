use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Granularity of a node in the inventory tree. `Building` is a container only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Building,
    Room,
    Apartment,
    Bedroom,
    Bed,
}

impl UnitKind {
    pub fn is_letable(self) -> bool {
        !matches!(self, UnitKind::Building)
    }

    /// Whether a unit of this kind may sit under a parent of `parent` kind.
    pub fn accepts_parent(self, parent: Option<UnitKind>) -> bool {
        matches!(
            (self, parent),
            (UnitKind::Building, None)
                | (UnitKind::Room, Some(UnitKind::Building))
                | (UnitKind::Apartment, Some(UnitKind::Building))
                | (UnitKind::Bedroom, Some(UnitKind::Apartment))
                | (UnitKind::Bed, Some(UnitKind::Bedroom))
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Building => "building",
            UnitKind::Room => "room",
            UnitKind::Apartment => "apartment",
            UnitKind::Bedroom => "bedroom",
            UnitKind::Bed => "bed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "building" => Some(UnitKind::Building),
            "room" => Some(UnitKind::Room),
            "apartment" => Some(UnitKind::Apartment),
            "bedroom" => Some(UnitKind::Bedroom),
            "bed" => Some(UnitKind::Bed),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged reference to a letable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub id: Ulid,
}

/// In-memory state of one node of the inventory tree.
///
/// For a leaf, `capacity` is owner-defined. For a container, `capacity` and
/// `occupied` are rollups over the leaf descendants and are only ever moved by
/// the ledger together with the leaf they come from.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub id: Ulid,
    pub kind: UnitKind,
    pub parent_id: Option<Ulid>,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub price_cents: Option<u64>,
    pub capacity: u32,
    pub occupied: u32,
    /// Manual override: an unlisted unit is never offered.
    pub listed: bool,
    /// Leaf only: the hold currently covering this unit, if any.
    pub active_hold: Option<Ulid>,
}

impl UnitState {
    pub fn new(spec: &UnitSpec) -> Self {
        Self {
            id: spec.id,
            kind: spec.kind,
            parent_id: spec.parent_id,
            name: spec.name.clone(),
            owner_id: spec.owner_id.clone(),
            price_cents: spec.price_cents,
            capacity: spec.capacity,
            occupied: 0,
            listed: true,
            active_hold: None,
        }
    }

    pub fn unit_ref(&self) -> UnitRef {
        UnitRef {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Free places; zero while unlisted.
    pub fn available(&self) -> u32 {
        if !self.listed {
            return 0;
        }
        self.capacity.saturating_sub(self.occupied)
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }
}

/// Input for creating a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub id: Ulid,
    pub kind: UnitKind,
    pub parent_id: Option<Ulid>,
    pub capacity: u32,
    pub owner_id: Option<String>,
    pub price_cents: Option<u64>,
    pub name: Option<String>,
}

impl UnitSpec {
    pub fn new(id: Ulid, kind: UnitKind, parent_id: Option<Ulid>, capacity: u32) -> Self {
        Self {
            id,
            kind,
            parent_id,
            capacity,
            owner_id: None,
            price_cents: None,
            name: None,
        }
    }

    pub fn owner(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }

    pub fn price(mut self, cents: u64) -> Self {
        self.price_cents = Some(cents);
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Partial update of a unit. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitPatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub price_cents: Option<u64>,
    pub listed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    PendingPayment,
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl HoldStatus {
    /// Status of a hold that still blocks its units (until `expires_at`).
    pub fn is_open(self) -> bool {
        matches!(self, HoldStatus::PendingPayment | HoldStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HoldStatus::PendingPayment => "pending_payment",
            HoldStatus::Pending => "pending",
            HoldStatus::Paid => "paid",
            HoldStatus::Cancelled => "cancelled",
            HoldStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending_payment" => Some(HoldStatus::PendingPayment),
            "pending" => Some(HoldStatus::Pending),
            "paid" => Some(HoldStatus::Paid),
            "cancelled" | "canceled" => Some(HoldStatus::Cancelled),
            "expired" => Some(HoldStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation in progress (or its terminal record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub target: UnitRef,
    /// Leaf units this hold covers, sorted.
    pub covered: Vec<Ulid>,
    pub user_id: String,
    pub owner_id: Option<String>,
    pub amount_cents: u64,
    pub status: HoldStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
    pub payment_reference: Option<String>,
    pub finalized_at: Option<Ms>,
    /// When the hold was cancelled or expired.
    pub closed_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
}

impl Hold {
    /// Open status and not yet past `expires_at`.
    pub fn is_active(&self, now: Ms) -> bool {
        self.status.is_open() && self.expires_at > now
    }

    /// Open status but past `expires_at`: waiting for the sweep.
    pub fn is_stale(&self, now: Ms) -> bool {
        self.status.is_open() && self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Money owed to a unit owner for one finalized hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Ulid,
    pub hold_id: Ulid,
    pub owner_id: Option<String>,
    pub amount_cents: u64,
    pub status: PayoutStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub transfer_reference: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// WAL record format. Flat, no nesting beyond records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitCreated {
        id: Ulid,
        kind: UnitKind,
        parent_id: Option<Ulid>,
        name: Option<String>,
        owner_id: Option<String>,
        price_cents: Option<u64>,
        capacity: u32,
        listed: bool,
    },
    UnitUpdated {
        id: Ulid,
        name: Option<String>,
        price_cents: Option<u64>,
        capacity: u32,
        listed: bool,
    },
    UnitDeleted {
        id: Ulid,
    },
    /// Also used by compaction to restore a hold in any status.
    HoldPlaced {
        hold: Hold,
    },
    HoldPaymentStarted {
        id: Ulid,
        at: Ms,
    },
    /// Hold -> paid, occupancy +1 on every covered unit, payout created.
    HoldFinalized {
        id: Ulid,
        payment_reference: String,
        at: Ms,
        payout: Payout,
    },
    HoldCancelled {
        id: Ulid,
        at: Ms,
    },
    HoldExpired {
        id: Ulid,
        at: Ms,
    },
    HoldCheckedOut {
        id: Ulid,
        at: Ms,
    },
    PayoutUpdated {
        payout: Payout,
    },
    /// Compaction only: leaf occupancy at the time of the snapshot.
    OccupancyRestored {
        unit_id: Ulid,
        occupied: u32,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: Ulid,
    pub kind: UnitKind,
    pub parent_id: Option<Ulid>,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub price_cents: Option<u64>,
    pub capacity: u32,
    pub occupied: u32,
    pub listed: bool,
}

impl From<&UnitState> for UnitInfo {
    fn from(u: &UnitState) -> Self {
        Self {
            id: u.id,
            kind: u.kind,
            parent_id: u.parent_id,
            name: u.name.clone(),
            owner_id: u.owner_id.clone(),
            price_cents: u.price_cents,
            capacity: u.capacity,
            occupied: u.occupied,
            listed: u.listed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySummary {
    pub unit_id: Ulid,
    pub kind: Option<UnitKind>,
    pub capacity: u32,
    pub occupied: u32,
    pub available: u32,
    pub is_full: bool,
    pub is_reserved: bool,
    pub listed: bool,
}

impl AvailabilitySummary {
    /// Fail-closed answer for a unit that does not exist.
    pub fn unknown(unit_id: Ulid) -> Self {
        Self {
            unit_id,
            kind: None,
            capacity: 0,
            occupied: 0,
            available: 0,
            is_full: true,
            is_reserved: true,
            listed: false,
        }
    }
}

/// Dashboard roll-up for an apartment or building, recomputed from its leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSummary {
    pub unit_id: Ulid,
    pub kind: UnitKind,
    pub capacity: u32,
    pub occupied: u32,
    pub available: u32,
    pub leaf_units: usize,
    pub reserved_units: usize,
    pub full_units: usize,
}

/// A container whose stored totals disagree with the sum of its leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupDrift {
    pub unit_id: Ulid,
    pub stored_capacity: u32,
    pub stored_occupied: u32,
    pub leaf_capacity: u32,
    pub leaf_occupied: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub unit_id: Ulid,
    pub has_conflict: bool,
    pub hold_id: Option<Ulid>,
    pub expires_at: Option<Ms>,
    pub remaining_ms: Option<Ms>,
    pub time_remaining: Option<String>,
}

impl ConflictInfo {
    pub fn none(unit_id: Ulid) -> Self {
        Self {
            unit_id,
            has_conflict: false,
            hold_id: None,
            expires_at: None,
            remaining_ms: None,
            time_remaining: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub paid: usize,
    pub retried: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(status: HoldStatus, expires_at: Ms) -> Hold {
        Hold {
            id: Ulid::new(),
            target: UnitRef {
                kind: UnitKind::Bed,
                id: Ulid::new(),
            },
            covered: vec![],
            user_id: "u1".into(),
            owner_id: None,
            amount_cents: 0,
            status,
            created_at: 0,
            expires_at,
            payment_reference: None,
            finalized_at: None,
            closed_at: None,
            checked_out_at: None,
        }
    }

    #[test]
    fn unit_kind_parents() {
        assert!(UnitKind::Building.accepts_parent(None));
        assert!(UnitKind::Room.accepts_parent(Some(UnitKind::Building)));
        assert!(UnitKind::Apartment.accepts_parent(Some(UnitKind::Building)));
        assert!(UnitKind::Bedroom.accepts_parent(Some(UnitKind::Apartment)));
        assert!(UnitKind::Bed.accepts_parent(Some(UnitKind::Bedroom)));

        assert!(!UnitKind::Bed.accepts_parent(Some(UnitKind::Apartment)));
        assert!(!UnitKind::Room.accepts_parent(None));
        assert!(!UnitKind::Building.accepts_parent(Some(UnitKind::Building)));
    }

    #[test]
    fn unit_kind_parse_is_case_insensitive() {
        assert_eq!(UnitKind::parse("Bedroom"), Some(UnitKind::Bedroom));
        assert_eq!(UnitKind::parse("BED"), Some(UnitKind::Bed));
        assert_eq!(UnitKind::parse("loft"), None);
        assert!(!UnitKind::Building.is_letable());
        assert!(UnitKind::Room.is_letable());
    }

    #[test]
    fn hold_activity_boundary() {
        let h = hold(HoldStatus::PendingPayment, 1_000);
        assert!(h.is_active(999));
        assert!(!h.is_active(1_000)); // expires_at is exclusive
        assert!(h.is_stale(1_000));

        let paid = hold(HoldStatus::Paid, 1_000);
        assert!(!paid.is_active(0));
        assert!(!paid.is_stale(2_000));
    }

    #[test]
    fn hold_status_strings() {
        for s in [
            HoldStatus::PendingPayment,
            HoldStatus::Pending,
            HoldStatus::Paid,
            HoldStatus::Cancelled,
            HoldStatus::Expired,
        ] {
            assert_eq!(HoldStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(HoldStatus::parse("canceled"), Some(HoldStatus::Cancelled));
    }

    #[test]
    fn unlisted_unit_has_no_availability() {
        let spec = UnitSpec::new(Ulid::new(), UnitKind::Room, Some(Ulid::new()), 2);
        let mut u = UnitState::new(&spec);
        assert_eq!(u.available(), 2);
        u.listed = false;
        assert_eq!(u.available(), 0);
        assert!(!u.is_full());
    }

    #[test]
    fn unknown_availability_fails_closed() {
        let a = AvailabilitySummary::unknown(Ulid::new());
        assert_eq!(a.capacity, 0);
        assert!(a.is_full);
        assert!(a.is_reserved);
        assert_eq!(a.available, 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::HoldPlaced {
            hold: hold(HoldStatus::Pending, 42),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
