//! Hard limits enforced at the engine and tenant boundaries.

use crate::model::Ms;

pub const MAX_UNITS_PER_TENANT: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_OWNER_ID_LEN: usize = 128;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_PAYMENT_REFERENCE_LEN: usize = 256;

/// Building -> apartment -> bedroom -> bed.
pub const MAX_HIERARCHY_DEPTH: usize = 4;

/// Upper bound on a single leaf's capacity.
pub const MAX_UNIT_CAPACITY: u32 = 64;

/// Leaf units a single whole-unit hold may cover.
pub const MAX_COVERED_UNITS: usize = 64;

/// Per-unit price ceiling. Keeps whole-unit sums far from overflow.
pub const MAX_PRICE_CENTS: u64 = 1_000_000_000;

pub const MIN_HOLD_MINUTES: u32 = 1;
pub const MAX_HOLD_MINUTES: u32 = 24 * 60;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Rows returned by list queries.
pub const MAX_QUERY_ROWS: usize = 10_000;

pub const MINUTE_MS: Ms = 60_000;
