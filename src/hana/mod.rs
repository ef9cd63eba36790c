//! HANA Control Plane
//!
//! Typed operations over the [`DatabaseControl`] port: topology discovery,
//! the prepare/confirm/abandon snapshot commands, the backup catalog and
//! tenant recovery.
//!
//! Whether the instance is multi-tenant is queried once when the session is
//! opened; afterwards every command is routed to the system database (for
//! `multidb` systems) or to the single container.

pub mod sql;

use crate::domain::model::{BackupId, BackupRecord, CatalogEntry, VolumeRole};
use crate::domain::ports::{DatabaseControlRef, Route, Routing, Row};
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Comment stored with an abandoned snapshot that has no array counterpart
pub const NO_SNAPSHOT_COMMENT: &str = "no_value";

/// A volume attached to a HANA host (scale-out topology)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedStorage {
    pub host: String,
    pub storage_id: String,
    pub path: String,
    pub wwid: String,
}

/// Control session against one HANA instance
#[derive(Clone)]
pub struct HanaControl {
    db: DatabaseControlRef,
    host: String,
    multi_tenant: bool,
}

impl HanaControl {
    /// Open a control session and detect multi-tenancy
    pub async fn connect(db: DatabaseControlRef, host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let probe = Route {
            host: host.clone(),
            routing: Routing::Tenant,
        };
        let rows = db.execute(sql::MULTIDB_MODE, &probe).await?;
        let multi_tenant = rows
            .iter()
            .flat_map(|row| row.iter().flatten())
            .any(|value| value.trim().eq_ignore_ascii_case("multidb"));

        info!(
            "HANA control session on {} ({})",
            host,
            if multi_tenant { "multi-tenant" } else { "single container" }
        );

        Ok(Self {
            db,
            host,
            multi_tenant,
        })
    }

    /// Same session, commands sent to another host
    pub fn retarget(&self, host: impl Into<String>) -> Self {
        Self {
            db: self.db.clone(),
            host: host.into(),
            multi_tenant: self.multi_tenant,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_multi_tenant(&self) -> bool {
        self.multi_tenant
    }

    fn route(&self) -> Route {
        Route {
            host: self.host.clone(),
            routing: if self.multi_tenant {
                Routing::SystemDatabase
            } else {
                Routing::Tenant
            },
        }
    }

    async fn query(&self, command: &str) -> Result<Vec<Row>> {
        debug!("HANA [{}]: {}", self.host, command);
        self.db.execute(command, &self.route()).await
    }

    async fn first_value(&self, command: &str) -> Result<String> {
        self.query(command)
            .await?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| Error::control(command, "query returned no value"))
    }

    /// Three character system id (SID)
    pub async fn instance_id(&self) -> Result<String> {
        Ok(self.first_value(sql::INSTANCE_ID).await?.trim().to_string())
    }

    /// Host running the master nameserver, where the system database lives
    pub async fn nameserver_host(&self) -> Result<String> {
        Ok(self.first_value(sql::NAMESERVER_MASTER).await?.trim().to_string())
    }

    /// Persistence base path for `role` with the trailing `/<SID>` removed,
    /// which is the mount point of the volume
    pub async fn basepath_mount(&self, role: VolumeRole, sid: &str) -> Result<String> {
        let path = self.first_value(&sql::basepath(role)).await?;
        Ok(strip_sid(path.trim(), sid))
    }

    /// Volumes under the base path of `role`, per host
    pub async fn attached_storages(&self, role: VolumeRole) -> Result<Vec<AttachedStorage>> {
        let command = sql::attached_storages(role);
        self.query(&command)
            .await?
            .into_iter()
            .map(|row| {
                let column = |i: usize| row.get(i).cloned().flatten().unwrap_or_default();
                let storage = AttachedStorage {
                    host: column(0),
                    storage_id: column(1),
                    path: column(2),
                    wwid: column(4),
                };
                if storage.host.is_empty() || storage.path.is_empty() {
                    return Err(Error::control(&command, "attached storage row without host or path"));
                }
                Ok(storage)
            })
            .collect()
    }

    /// Create a prepared data snapshot and look up the id it was assigned
    pub async fn prepare_snapshot(&self) -> Result<BackupRecord> {
        let comment = format!(
            "SNAPSHOT-{}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );
        info!("Preparing HANA data snapshot '{}'", comment);

        self.query(&sql::create_snapshot(&comment)).await?;

        let lookup = sql::prepared_backup_id(&comment);
        let backup_id = self.first_value(&lookup).await.map_err(|e| {
            warn!(
                "Snapshot '{}' was prepared but its backup id could not be read, close it manually",
                comment
            );
            e
        })?;

        let record = BackupRecord::prepared(BackupId::new(backup_id));
        info!("HANA data snapshot prepared with backup id {}", record.backup_id);
        Ok(record)
    }

    /// Close the snapshot as successful, naming the array snapshots
    pub async fn confirm_snapshot(&self, record: &mut BackupRecord) -> Result<()> {
        if record.storage_snapshot_ids.is_empty() {
            return Err(Error::StateInconsistency {
                backup_id: record.backup_id.to_string(),
                state: record.state.to_string(),
                reason: "no storage snapshot to confirm".into(),
            });
        }
        let external_id = record.storage_snapshot_ids.join(", ");
        info!("Confirming storage snapshot with backup id {}", record.backup_id);
        self.query(&sql::close_snapshot_successful(&record.backup_id, &external_id))
            .await?;
        record.confirm()
    }

    /// Close the snapshot as unsuccessful
    pub async fn abandon_snapshot(&self, record: &mut BackupRecord) -> Result<()> {
        info!("Abandoning storage snapshot with backup id {}", record.backup_id);
        let comment = if record.storage_snapshot_ids.is_empty() {
            NO_SNAPSHOT_COMMENT.to_string()
        } else {
            record.storage_snapshot_ids.join(", ")
        };
        self.query(&sql::close_snapshot_unsuccessful(&record.backup_id, &comment))
            .await?;
        record.abandon()
    }

    /// Data snapshots in the catalog, most recent first, numbered from 1
    pub async fn snapshot_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let rows = self.query(sql::SNAPSHOT_CATALOG).await?;
        let mut entries = rows
            .into_iter()
            .map(|row| {
                let backup_id = row.first().cloned().flatten();
                let started = row.get(1).cloned().flatten();
                match (backup_id, started) {
                    (Some(id), Some(started)) => Ok((BackupId::new(id), parse_timestamp(&started)?)),
                    _ => Err(Error::control(sql::SNAPSHOT_CATALOG, "catalog row without id or start time")),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        entries.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, (backup_id, started_at))| CatalogEntry {
                catalog_id: index + 1,
                backup_id,
                started_at,
            })
            .collect())
    }

    /// Tenants that are not running, in catalog order
    pub async fn inactive_tenants(&self) -> Result<Vec<String>> {
        Ok(self
            .query(sql::INACTIVE_TENANTS)
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub async fn recover_tenant(&self, tenant: &str) -> Result<()> {
        info!("Recovering tenant {} from snapshot", tenant);
        let route = Route {
            host: self.host.clone(),
            routing: Routing::SystemDatabase,
        };
        self.db.execute(&sql::recover_tenant(tenant), &route).await?;
        Ok(())
    }
}

fn strip_sid(path: &str, sid: &str) -> String {
    let suffix = format!("/{}", sid);
    let trimmed = path.trim_end_matches('/');
    trimmed
        .strip_suffix(&suffix)
        .unwrap_or(trimmed)
        .to_string()
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| Error::control(sql::SNAPSHOT_CATALOG, format!("unreadable timestamp '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::BackupState;
    use crate::testing::FakeDatabase;
    use assert_matches::assert_matches;

    async fn session(db: &std::sync::Arc<FakeDatabase>) -> HanaControl {
        HanaControl::connect(db.clone(), "hana01").await.unwrap()
    }

    #[tokio::test]
    async fn test_multi_tenant_routes_to_system_database() {
        let db = FakeDatabase::new();
        db.respond("SECTION = 'multidb'", vec![vec!["multidb"]]);
        db.respond("M_SYSTEM_OVERVIEW", vec![vec!["HN1"]]);

        let hana = session(&db).await;
        assert!(hana.is_multi_tenant());
        assert_eq!(hana.instance_id().await.unwrap(), "HN1");

        let (_, route) = db.executed_matching("M_SYSTEM_OVERVIEW").remove(0);
        assert_eq!(route.routing, Routing::SystemDatabase);
        assert_eq!(route.host, "hana01");
    }

    #[tokio::test]
    async fn test_single_container_routes_to_tenant() {
        let db = FakeDatabase::new();
        db.respond("SECTION = 'multidb'", vec![vec!["singledb"]]);

        let hana = session(&db).await.retarget("hana02");
        hana.inactive_tenants().await.unwrap();

        let (_, route) = db.executed_matching("M_DATABASES").remove(0);
        assert_eq!(route, Route { host: "hana02".into(), routing: Routing::Tenant });
    }

    #[tokio::test]
    async fn test_basepath_mount_strips_sid() {
        let db = FakeDatabase::new();
        db.respond("basepath_datavolumes", vec![vec!["/hana/data/HN1"]]);
        let hana = session(&db).await;

        let mount = hana.basepath_mount(VolumeRole::Data, "HN1").await.unwrap();
        assert_eq!(mount, "/hana/data");
    }

    #[tokio::test]
    async fn test_prepare_reads_assigned_backup_id() {
        let db = FakeDatabase::new();
        db.respond("STATE_NAME = 'prepared'", vec![vec!["42", "SNAPSHOT-x"]]);
        let hana = session(&db).await;

        let record = hana.prepare_snapshot().await.unwrap();
        assert_eq!(record.backup_id, BackupId::from(42));
        assert_eq!(record.state, BackupState::Prepared);

        let executed = db.executed();
        let create = executed.iter().position(|s| s.contains("CREATE SNAPSHOT")).unwrap();
        let lookup = executed.iter().position(|s| s.contains("STATE_NAME")).unwrap();
        assert!(create < lookup);
    }

    #[tokio::test]
    async fn test_prepare_without_catalog_entry_fails() {
        let db = FakeDatabase::new();
        let hana = session(&db).await;
        assert_matches!(hana.prepare_snapshot().await, Err(Error::ControlCommand { .. }));
    }

    #[tokio::test]
    async fn test_confirm_and_abandon() {
        let db = FakeDatabase::new();
        let hana = session(&db).await;

        let mut record = BackupRecord::prepared(BackupId::from(42));
        assert_matches!(
            hana.confirm_snapshot(&mut record).await,
            Err(Error::StateInconsistency { .. })
        );

        hana.abandon_snapshot(&mut record).await.unwrap();
        assert_eq!(record.state, BackupState::Abandoned);
        assert_eq!(db.executed_matching("BACKUP_ID 42 UNSUCCESSFUL 'no_value'").len(), 1);

        let mut record = BackupRecord::prepared(BackupId::from(43));
        record.record_snapshot("5F1C0D");
        hana.confirm_snapshot(&mut record).await.unwrap();
        assert_eq!(record.state, BackupState::Confirmed);
        assert_eq!(
            db.executed_matching("BACKUP_ID 43 SUCCESSFUL 'FlashArray Snapshot ID :5F1C0D'")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_catalog_most_recent_first() {
        let db = FakeDatabase::new();
        db.respond(
            "ENTRY_TYPE_NAME = 'data snapshot' ORDER BY",
            vec![
                vec!["300", "2026-10-17 22:00:00.000000000"],
                vec!["100", "2026-10-19 22:00:00.000000000"],
                vec!["200", "2026-10-18 22:00:00.000000000"],
            ],
        );
        let hana = session(&db).await;

        let catalog = hana.snapshot_catalog().await.unwrap();
        let listed: Vec<(usize, &str)> = catalog
            .iter()
            .map(|e| (e.catalog_id, e.backup_id.as_str()))
            .collect();
        assert_eq!(listed, vec![(1, "100"), (2, "200"), (3, "300")]);
    }

    #[tokio::test]
    async fn test_catalog_rejects_bad_timestamp() {
        let db = FakeDatabase::new();
        db.respond("ORDER BY SYS_END_TIME", vec![vec!["1", "yesterday"]]);
        let hana = session(&db).await;
        assert!(hana.snapshot_catalog().await.is_err());
    }

    #[tokio::test]
    async fn test_attached_storages() {
        let db = FakeDatabase::new();
        db.respond(
            "M_ATTACHED_STORAGES",
            vec![
                vec!["hana01", "1", "/hana/data/mnt00001", "WWID", "3624a9370aa"],
                vec!["hana02", "2", "/hana/data/mnt00002", "WWID", "3624a9370bb"],
            ],
        );
        let hana = session(&db).await;

        let storages = hana.attached_storages(VolumeRole::Data).await.unwrap();
        assert_eq!(storages.len(), 2);
        assert_eq!(storages[1].host, "hana02");
        assert_eq!(storages[1].path, "/hana/data/mnt00002");
        assert_eq!(storages[1].wwid, "3624a9370bb");
    }

    #[test]
    fn test_strip_sid() {
        assert_eq!(strip_sid("/hana/log/HN1/", "HN1"), "/hana/log");
        assert_eq!(strip_sid("/hana/data", "HN1"), "/hana/data");
    }
}
