use std::path::PathBuf;
use std::time::Duration;

use crate::model::Ms;

/// Server settings, read once at startup from `ROOMHOLD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub tenant: TenantSettings,
}

/// Per-tenant background work.
#[derive(Debug, Clone)]
pub struct TenantSettings {
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How long cancelled, expired and checked-out holds survive compaction.
    pub hold_retention_ms: Ms,
    pub sweep_interval: Duration,
    pub settle_interval: Duration,
    pub max_payout_attempts: u32,
    /// When set, only this user may mark holds paid.
    pub payment_user: Option<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            hold_retention_ms: 7 * 24 * 60 * 60 * 1000,
            sweep_interval: Duration::from_secs(60),
            settle_interval: Duration::from_secs(30),
            max_payout_attempts: 5,
            payment_user: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let defaults = TenantSettings::default();

        Self {
            port: lookup("ROOMHOLD_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5433),
            bind: lookup("ROOMHOLD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("ROOMHOLD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("ROOMHOLD_PASSWORD").unwrap_or_else(|| "roomhold".into()),
            max_connections: parsed("ROOMHOLD_MAX_CONNECTIONS").map_or(256, |n| n as usize),
            metrics_port: lookup("ROOMHOLD_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: lookup("ROOMHOLD_TLS_CERT"),
            tls_key: lookup("ROOMHOLD_TLS_KEY"),
            tenant: TenantSettings {
                compact_threshold: parsed("ROOMHOLD_COMPACT_THRESHOLD")
                    .unwrap_or(defaults.compact_threshold),
                hold_retention_ms: parsed("ROOMHOLD_HOLD_RETENTION_MS")
                    .map_or(defaults.hold_retention_ms, |ms| ms as Ms),
                sweep_interval: parsed("ROOMHOLD_SWEEP_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .map_or(defaults.sweep_interval, Duration::from_secs),
                settle_interval: parsed("ROOMHOLD_SETTLE_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .map_or(defaults.settle_interval, Duration::from_secs),
                max_payout_attempts: parsed("ROOMHOLD_MAX_PAYOUT_ATTEMPTS")
                    .filter(|n| *n > 0)
                    .map_or(defaults.max_payout_attempts, |n| n as u32),
                payment_user: lookup("ROOMHOLD_PAYMENT_USER").filter(|u| !u.is_empty()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.port, 5433);
        assert_eq!(c.bind, "0.0.0.0");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.password, "roomhold");
        assert_eq!(c.max_connections, 256);
        assert!(c.metrics_port.is_none());
        assert_eq!(c.tenant.compact_threshold, 1000);
        assert_eq!(c.tenant.sweep_interval, Duration::from_secs(60));
        assert_eq!(c.tenant.max_payout_attempts, 5);
        assert!(c.tenant.payment_user.is_none());
    }

    #[test]
    fn overrides_and_bad_values() {
        let c = config(&[
            ("ROOMHOLD_PORT", "6000"),
            ("ROOMHOLD_SWEEP_INTERVAL_SECS", "5"),
            ("ROOMHOLD_MAX_PAYOUT_ATTEMPTS", "0"),
            ("ROOMHOLD_COMPACT_THRESHOLD", "lots"),
            ("ROOMHOLD_HOLD_RETENTION_MS", "60000"),
            ("ROOMHOLD_PAYMENT_USER", "payments"),
        ]);
        assert_eq!(c.port, 6000);
        assert_eq!(c.tenant.sweep_interval, Duration::from_secs(5));
        assert_eq!(c.tenant.max_payout_attempts, 5);
        assert_eq!(c.tenant.compact_threshold, 1000);
        assert_eq!(c.tenant.hold_retention_ms, 60_000);
        assert_eq!(c.tenant.payment_user.as_deref(), Some("payments"));
    }
}
