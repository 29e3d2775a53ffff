use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomhold_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomhold_query_duration_seconds";

// ── Connections and tenants ─────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "roomhold_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomhold_connections_total";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomhold_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "roomhold_tenants_active";

/// Counter: failed logins.
pub const AUTH_FAILURES_TOTAL: &str = "roomhold_auth_failures_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomhold_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomhold_wal_flush_batch_size";

// ── Reservations ────────────────────────────────────────────────

/// Counter: hold attempts. Labels: outcome (created, unavailable, conflict, rejected).
pub const HOLDS_CREATED_TOTAL: &str = "roomhold_holds_created_total";

/// Counter: holds moved to expired by the sweep.
pub const HOLDS_EXPIRED_TOTAL: &str = "roomhold_holds_expired_total";

/// Counter: occupancy increments refused for exceeding capacity. Any non-zero
/// value is a bug.
pub const CAPACITY_VIOLATIONS_TOTAL: &str = "roomhold_capacity_violations_total";

/// Counter: payout attempts. Labels: outcome (paid, pending, failed).
pub const PAYOUTS_TOTAL: &str = "roomhold_payouts_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUnit { .. } => "insert_unit",
        Command::UpdateUnit { .. } => "update_unit",
        Command::DeleteUnit { .. } => "delete_unit",
        Command::SelectUnits { .. } => "select_units",
        Command::InsertHold { .. } => "insert_hold",
        Command::StartPayment { .. } => "start_payment",
        Command::FinalizeHold { .. } => "finalize_hold",
        Command::CancelHold { .. } => "cancel_hold",
        Command::CheckOut { .. } => "check_out",
        Command::SelectHolds { .. } => "select_holds",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSummary { .. } => "select_summary",
        Command::SelectConflict { .. } => "select_conflict",
        Command::SelectPayouts { .. } => "select_payouts",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn labels_follow_statement() {
        let id = ulid::Ulid::new();
        let label = |sql: &str| command_label(&parse_sql(sql).unwrap());
        assert_eq!(label(&format!("SELECT * FROM conflicts WHERE unit_id = '{id}'")), "select_conflict");
        assert_eq!(label(&format!("DELETE FROM units WHERE id = '{id}'")), "delete_unit");
        assert_eq!(label("UNLISTEN *"), "unlisten_all");
    }
}
