use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::TenantSettings;
use crate::engine::{Engine, PayoutProcessor};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Per-tenant engines. Each tenant gets its own Engine, WAL, expiry sweep,
/// settlement sweep and compactor. Tenant = database name from the pgwire
/// connection, so every database is an isolated marketplace.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: TenantSettings,
    processor: Arc<dyn PayoutProcessor>,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        settings: TenantSettings,
        processor: Arc<dyn PayoutProcessor>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
            processor,
        }
    }

    pub fn settings(&self) -> &TenantSettings {
        &self.settings
    }

    /// Get or lazily create an engine for the given tenant. Names that
    /// sanitize to the same file name are the same tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Only [A-Za-z0-9_-] reaches the filesystem.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections may race to open the same tenant; only one engine may own the WAL.
        let entry = match self.engines.entry(safe_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => v,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        let s = &self.settings;
        tokio::spawn(reaper::run_reaper(engine.clone(), s.sweep_interval));
        tokio::spawn(reaper::run_settlement(
            engine.clone(),
            self.processor.clone(),
            s.settle_interval,
            s.max_payout_attempts,
        ));
        tokio::spawn(reaper::run_compactor(
            engine.clone(),
            s.compact_threshold,
            s.hold_retention_ms,
        ));

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened tenant {safe_name}");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualPayouts;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomhold_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, TenantSettings::default(), Arc::new(ManualPayouts))
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));

        let eng_a = tm.get_or_create("campus_a").unwrap();
        let eng_b = tm.get_or_create("campus_b").unwrap();

        let (building, room) = (Ulid::new(), Ulid::new());
        for eng in [&eng_a, &eng_b] {
            eng.create_unit(UnitSpec::new(building, UnitKind::Building, None, 0))
                .await
                .unwrap();
            eng.create_unit(UnitSpec::new(room, UnitKind::Room, Some(building), 1))
                .await
                .unwrap();
        }

        eng_a
            .create_hold(Ulid::new(), room, "student", 30)
            .await
            .unwrap();

        assert!(eng_a.get_availability(room).await.is_reserved);
        assert!(!eng_b.get_availability(room).await.is_reserved);
        assert!(eng_b.holds_for_user("student").is_empty());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn names_sharing_a_wal_share_an_engine() {
        let dir = test_data_dir("shared_wal");
        let tm = manager(dir.clone());

        let plain = tm.get_or_create("campus").unwrap();
        let dotted = tm.get_or_create("camp.us").unwrap();
        assert!(Arc::ptr_eq(&plain, &dotted));

        let (own, other) = (Ulid::new(), Ulid::new());
        plain
            .create_unit(UnitSpec::new(own, UnitKind::Building, None, 0))
            .await
            .unwrap();
        dotted
            .create_unit(UnitSpec::new(other, UnitKind::Building, None, 0))
            .await
            .unwrap();

        let wal_files: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.ends_with(".wal"))
            .collect();
        assert_eq!(wal_files, vec!["campus.wal".to_string()]);

        let reopened = manager(dir).get_or_create("campus").unwrap();
        assert!(reopened.get_unit(&own).await.is_some());
        assert!(reopened.get_unit(&other).await.is_some());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = manager(test_data_dir("count_limit"));

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
