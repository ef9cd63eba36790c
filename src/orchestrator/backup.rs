//! Backup protocols

use super::freeze::quiesce;
use super::{RunContext, SnapshotOrchestrator};
use crate::domain::model::{
    BackupId, BackupRecord, DeploymentMode, MountTarget, ProtectionGroup, VolumeDescriptor,
    VolumeRole,
};
use crate::domain::ports::PgroupSnapshot;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// What kind of backup to take
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Snapshot data and log volumes atomically through a protection group
    /// instead of preparing a database snapshot
    pub crash_consistent: bool,
    /// Freeze the filesystems around the storage snapshot
    pub freeze: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Confirmed in the backup catalog
    ApplicationConsistent(BackupRecord),
    CrashConsistent {
        group: ProtectionGroup,
        snapshot: PgroupSnapshot,
    },
}

impl SnapshotOrchestrator {
    pub async fn backup(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let ctx = self.open_context().await?;
        if request.crash_consistent {
            self.crash_consistent_backup(&ctx, request.freeze).await
        } else {
            self.application_consistent_backup(&ctx, request.freeze).await
        }
    }

    async fn application_consistent_backup(&self, ctx: &RunContext, freeze: bool) -> Result<BackupOutcome> {
        let targets = self.persistence_targets(ctx, VolumeRole::Data).await?;
        info!("Data volumes of {}: {:?}", ctx.sid, targets);

        let mut record = ctx.control.prepare_snapshot().await?;

        match self.snapshot_data_volumes(&targets, freeze, &mut record).await {
            Ok(()) => {}
            Err(e) => return self.abandon(ctx, &mut record, e).await,
        }

        if let Err(e) = ctx.control.confirm_snapshot(&mut record).await {
            error!(
                "Storage snapshots of backup {} exist but the confirmation failed",
                record.backup_id
            );
            return Err(Error::StateInconsistency {
                backup_id: record.backup_id.to_string(),
                state: record.state.to_string(),
                reason: format!("confirm failed: {}", e),
            });
        }

        info!(
            "Backup {} confirmed with storage snapshots {:?}",
            record.backup_id, record.storage_snapshot_ids
        );
        Ok(BackupOutcome::ApplicationConsistent(record))
    }

    /// Resolve every data volume, then snapshot each one inside its own
    /// freeze scope
    async fn snapshot_data_volumes(
        &self,
        targets: &[MountTarget],
        freeze: bool,
        record: &mut BackupRecord,
    ) -> Result<()> {
        let volumes = self.resolver.resolve_all(targets).await?;

        for volume in &volumes {
            let name = array_volume(volume)?;
            let suffix = snapshot_suffix(&self.config.deployment, volume, &record.backup_id);
            let suffix = suffix.as_str();
            let scope = [volume.target()];
            let array = &self.array;

            let snapshot = quiesce(&self.hosts, &scope, freeze, move || {
                info!("Creating snapshot {}.{}", name, suffix);
                array.create_snapshot(name, suffix)
            })
            .await?;

            info!("Storage snapshot {} has serial {}", snapshot.name, snapshot.serial);
            record.record_snapshot(snapshot.serial);
        }
        Ok(())
    }

    /// Close the prepared snapshot as unsuccessful after `cause`
    async fn abandon(&self, ctx: &RunContext, record: &mut BackupRecord, cause: Error) -> Result<BackupOutcome> {
        if cause.is_resolution() {
            error!(
                "Backup {} failed before any storage snapshot was taken: {}",
                record.backup_id, cause
            );
        } else {
            error!("Backup {} failed: {}", record.backup_id, cause);
        }
        match ctx.control.abandon_snapshot(record).await {
            Ok(()) => {
                warn!("Backup {} abandoned", record.backup_id);
                Err(cause)
            }
            Err(compensation) => {
                error!(
                    "Abandoning backup {} failed, it is still prepared in the catalog: {}",
                    record.backup_id, compensation
                );
                Err(Error::CompensationFailed {
                    backup_id: record.backup_id.to_string(),
                    original: Box::new(cause),
                    compensation: Box::new(compensation),
                })
            }
        }
    }

    async fn crash_consistent_backup(&self, ctx: &RunContext, freeze: bool) -> Result<BackupOutcome> {
        let mut targets = self.persistence_targets(ctx, VolumeRole::Data).await?;
        targets.extend(self.persistence_targets(ctx, VolumeRole::Log).await?);

        let volumes = self.resolver.resolve_all(&targets).await?;
        let members = volumes
            .iter()
            .map(|v| array_volume(v).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        let group_name = ProtectionGroup::name_for(&ctx.sid);
        let group_name = group_name.as_str();
        let members = members.as_slice();
        let (group, snapshot) = quiesce(&self.hosts, &targets, freeze, move || async move {
            let group = self.ensure_protection_group(group_name, members).await?;
            info!("Creating snapshot of protection group {}", group.name);
            let snapshot = self.array.create_pgroup_snapshot(&group.name).await?;
            Ok((group, snapshot))
        })
        .await?;

        info!("Crash consistent storage snapshot {} created", snapshot.name);
        Ok(BackupOutcome::CrashConsistent { group, snapshot })
    }

    /// Create the group unless it exists and add every volume to it.
    ///
    /// Another run creating the same group concurrently counts as success.
    pub async fn ensure_protection_group(&self, name: &str, volumes: &[String]) -> Result<ProtectionGroup> {
        let mut group = ProtectionGroup::new(name);

        match self.array.get_pgroup(name).await? {
            Some(existing) => {
                group.members.extend(existing.volumes);
            }
            None => match self.array.create_pgroup(name).await {
                Ok(_) => info!("Created protection group {}", name),
                Err(Error::ResourceExists { .. }) => {
                    info!("Protection group {} was created concurrently", name)
                }
                Err(e) => return Err(e),
            },
        }

        for volume in volumes {
            if group.members.contains(volume) {
                continue;
            }
            self.array.add_volume_to_pgroup(volume, name).await?;
            group.members.insert(volume.clone());
        }
        Ok(group)
    }
}

fn array_volume(volume: &VolumeDescriptor) -> Result<&str> {
    volume.array_volume_name().ok_or_else(|| {
        Error::Internal(format!(
            "{}:{} was not resolved to an array volume",
            volume.host, volume.mount_point
        ))
    })
}

/// Suffix of the storage snapshot of one data volume
pub fn snapshot_suffix(deployment: &DeploymentMode, volume: &VolumeDescriptor, backup_id: &BackupId) -> String {
    match deployment {
        DeploymentMode::ScaleUp => format!("SAPHANA-{}", backup_id),
        DeploymentMode::ScaleOut { .. } => {
            let host = volume.host.split('.').next().unwrap_or(&volume.host);
            format!("SAPHANA-{}-{}-{}", host, volume.mount_point.replace('/', ""), backup_id)
        }
    }
}
