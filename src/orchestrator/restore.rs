//! Restore protocol
//!
//! Catalog selection and confirmation happen through the operator prompt
//! before anything changes. Once the instance stop has been issued the run
//! either completes or fails with [`Error::ManualRecoveryRequired`]; nothing
//! is rolled back.

use super::poll::wait_until;
use super::{RunContext, SnapshotOrchestrator};
use crate::domain::model::{
    BackupId, CatalogEntry, MountTarget, Serial, VolumeDescriptor, VolumeRole, FLASHARRAY_MAPPER_PREFIX,
};
use crate::domain::ports::{RestoreNotice, VolumeSnapshot, PROTOCOL_ENDPOINT_VOLUME};
use crate::error::{Error, Result};
use crate::host::{InstanceStatus, Rescan};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Restore tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Pause after a SCSI rescan before the new device is mounted
    pub rescan_settle_secs: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self { rescan_settle_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreStrategy {
    /// Copy the snapshot over the existing data volume
    OverwriteInPlace,
    /// Copy the snapshot to a new volume and swap the host connections
    CopyToNewVolume,
}

impl std::fmt::Display for RestoreStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreStrategy::OverwriteInPlace => write!(f, "overwrite in place"),
            RestoreStrategy::CopyToNewVolume => write!(f, "copy to new volume"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Overwrite the data volume instead of restoring to a new one
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored {
        backup_id: BackupId,
        strategy: RestoreStrategy,
        /// Array volume now mounted at the data mount point
        volume: String,
        tenants_recovered: Vec<String>,
        /// The data volume changed, so `/etc/fstab` needs the new device
        fstab_update_required: bool,
    },
    /// The operator left the selection without restoring
    Cancelled,
}

/// Data volume as found before the restore
struct RestoreTarget {
    volume: VolumeDescriptor,
    /// Device currently mounted, used to remount virtual disks
    device: Option<String>,
    strategy: RestoreStrategy,
    overwrite_forced: bool,
}

impl SnapshotOrchestrator {
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreOutcome> {
        if self.config.deployment.is_scale_out() {
            return Err(Error::Configuration(
                "restore is supported for scale-up deployments only".into(),
            ));
        }
        if self.config.host.sidadm_password.is_none() {
            return Err(Error::Configuration(
                "the <sid>adm password is required to recover the system database after a restore".into(),
            ));
        }

        let ctx = self.open_context().await?;
        let target = self.restore_target(&ctx, request).await?;

        let catalog = ctx.control.snapshot_catalog().await?;
        if catalog.is_empty() {
            self.prompt
                .notify(&format!("No data snapshots found in the backup catalog of {}", ctx.sid))
                .await?;
            return Ok(RestoreOutcome::Cancelled);
        }

        let (entry, snapshot) = match self.select_snapshot(&catalog, &target).await? {
            Some(selected) => selected,
            None => {
                info!("Restore cancelled by the operator");
                return Ok(RestoreOutcome::Cancelled);
            }
        };

        self.restore_selected(&ctx, &target, &entry, &snapshot)
            .await
            .map_err(|e| {
                error!(
                    "Restore of backup {} failed after the instance was stopped: {}",
                    entry.backup_id, e
                );
                Error::ManualRecoveryRequired(Box::new(e))
            })
    }

    async fn restore_target(&self, ctx: &RunContext, request: &RestoreRequest) -> Result<RestoreTarget> {
        let mount_point = ctx.control.basepath_mount(VolumeRole::Data, &ctx.sid).await?;
        let target = MountTarget::new(self.config.hana_host.clone(), mount_point, VolumeRole::Data);
        let volume = self.resolver.resolve(&target).await?;

        let virtual_disk = volume
            .location
            .as_ref()
            .map_or(false, |location| location.is_virtual_disk());
        let device = if virtual_disk {
            Some(self.hosts.mounted_device(&target.host, &target.mount_point).await?)
        } else {
            None
        };

        let overwrite_forced = virtual_disk && !request.overwrite;
        if overwrite_forced {
            warn!(
                "{} is a virtual disk, the restore will overwrite the volume in place",
                target.mount_point
            );
        }
        let strategy = if request.overwrite || virtual_disk {
            RestoreStrategy::OverwriteInPlace
        } else {
            RestoreStrategy::CopyToNewVolume
        };

        Ok(RestoreTarget {
            volume,
            device,
            strategy,
            overwrite_forced,
        })
    }

    /// Ask for a catalog entry until one with a storage snapshot is confirmed
    async fn select_snapshot(
        &self,
        catalog: &[CatalogEntry],
        target: &RestoreTarget,
    ) -> Result<Option<(CatalogEntry, VolumeSnapshot)>> {
        loop {
            let catalog_id = match self.prompt.select_backup(catalog).await? {
                Some(id) => id,
                None => return Ok(None),
            };
            let entry = match catalog.iter().find(|e| e.catalog_id == catalog_id) {
                Some(entry) => entry,
                None => {
                    self.prompt
                        .notify(&format!("There is no catalog entry {}", catalog_id))
                        .await?;
                    continue;
                }
            };

            let source = target.volume.array_volume_name().unwrap_or_default();
            let snapshot = match self.find_storage_snapshot(&entry.backup_id, source).await? {
                Some(snapshot) => snapshot,
                None => {
                    warn!("No storage snapshot for backup {}", entry.backup_id);
                    self.prompt
                        .notify(&format!(
                            "The storage snapshot for backup {} was not found on the FlashArray",
                            entry.backup_id
                        ))
                        .await?;
                    continue;
                }
            };

            let notice = RestoreNotice {
                backup_id: entry.backup_id.clone(),
                snapshot: snapshot.name.clone(),
                overwrite: target.strategy == RestoreStrategy::OverwriteInPlace,
                overwrite_forced: target.overwrite_forced,
            };
            if self.prompt.confirm_restore(&notice).await? {
                info!("Restoring backup {} from {}", entry.backup_id, snapshot.name);
                return Ok(Some((entry.clone(), snapshot)));
            }
            info!("Restore of backup {} declined", entry.backup_id);
        }
    }

    /// Snapshot whose name carries `backup_id`, preferring one taken of
    /// `source`
    pub async fn find_storage_snapshot(&self, backup_id: &BackupId, source: &str) -> Result<Option<VolumeSnapshot>> {
        let mut found: Option<VolumeSnapshot> = None;
        for volume in self.array.list_volumes().await? {
            let matching = self
                .array
                .list_volume_snapshots(&volume.name)
                .await?
                .into_iter()
                .find(|snapshot| snapshot.name.contains(backup_id.as_str()));
            if let Some(snapshot) = matching {
                if snapshot.source == source {
                    return Ok(Some(snapshot));
                }
                found.get_or_insert(snapshot);
            }
        }
        Ok(found)
    }

    async fn restore_selected(
        &self,
        ctx: &RunContext,
        target: &RestoreTarget,
        entry: &CatalogEntry,
        snapshot: &VolumeSnapshot,
    ) -> Result<RestoreOutcome> {
        let host = target.volume.host.as_str();
        let mount_point = target.volume.mount_point.as_str();

        self.hosts.stop_instance(host).await?;
        self.wait_for_instance(host, InstanceStatus::Stopped, self.config.polling.stop_deadline())
            .await?;
        self.hosts.unmount(host, mount_point).await?;

        let volume = match target.strategy {
            RestoreStrategy::OverwriteInPlace => self.overwrite_in_place(target, snapshot).await?,
            RestoreStrategy::CopyToNewVolume => self.copy_to_new_volume(target, snapshot, &entry.backup_id).await?,
        };

        self.hosts.recover_system_database(host, &ctx.sid).await?;
        self.wait_for_instance(host, InstanceStatus::Running, self.config.polling.start_deadline())
            .await?;

        let tenants = ctx.control.inactive_tenants().await?;
        for tenant in &tenants {
            ctx.control.recover_tenant(tenant).await?;
        }

        let fstab_update_required = target.strategy == RestoreStrategy::CopyToNewVolume;
        if fstab_update_required {
            self.prompt
                .notify(&format!(
                    "{} is now backed by volume {}, update /etc/fstab on {} before the next reboot",
                    mount_point, volume, host
                ))
                .await?;
        }

        info!("Backup {} restored ({})", entry.backup_id, target.strategy);
        Ok(RestoreOutcome::Restored {
            backup_id: entry.backup_id.clone(),
            strategy: target.strategy,
            volume,
            tenants_recovered: tenants,
            fstab_update_required,
        })
    }

    async fn wait_for_instance(&self, host: &str, wanted: InstanceStatus, deadline: Duration) -> Result<InstanceStatus> {
        let what = format!("instance {} on {} to be {}", self.hosts.instance_number(), host, wanted);
        let hosts = &self.hosts;
        wait_until(
            &self.config.polling,
            deadline,
            &what,
            move || hosts.instance_status(host),
            |status| *status == wanted,
        )
        .await
    }

    async fn overwrite_in_place(&self, target: &RestoreTarget, snapshot: &VolumeSnapshot) -> Result<String> {
        let data = &target.volume;
        let volume = data
            .array_volume_name()
            .ok_or_else(|| Error::VolumeNotFound {
                serial: data.serial_number.to_string(),
            })?
            .to_string();

        info!("Overwriting {} with {}", volume, snapshot.name);
        let restored = self.array.copy_volume(&snapshot.name, &volume, true).await?;

        self.hosts.rescan_scsi(&data.host, Rescan::Add).await?;
        self.settle().await;

        let device = match &target.device {
            Some(device) => device.clone(),
            None => mapper_device(&restored.serial),
        };
        self.hosts.mount(&data.host, &device, &data.mount_point).await?;

        let mounted = self.hosts.volume_serial(&data.host, &data.mount_point).await?;
        if mounted != data.serial_number {
            return Err(Error::storage(
                "verify remount",
                format!("{} has serial {}, expected {}", data.mount_point, mounted, data.serial_number),
            ));
        }
        Ok(volume)
    }

    async fn copy_to_new_volume(
        &self,
        target: &RestoreTarget,
        snapshot: &VolumeSnapshot,
        backup_id: &BackupId,
    ) -> Result<String> {
        let data = &target.volume;
        let source = data.array_volume_name().ok_or_else(|| Error::VolumeNotFound {
            serial: data.serial_number.to_string(),
        })?;
        let new_name = format!("{}-{}", source, backup_id);

        info!("Copying {} to new volume {}", snapshot.name, new_name);
        let restored = self.array.copy_volume(&snapshot.name, &new_name, false).await?;

        let mut connected_hosts = Vec::new();
        for array_host in self.array.list_hosts().await? {
            let connections = self.array.list_host_connections(&array_host.name).await?;
            if connections
                .iter()
                .any(|c| c.vol != PROTOCOL_ENDPOINT_VOLUME && c.vol == source)
            {
                connected_hosts.push(array_host.name);
            }
        }
        if connected_hosts.is_empty() {
            return Err(Error::HostConnectionNotFound {
                serial: data.serial_number.to_string(),
            });
        }

        for array_host in &connected_hosts {
            info!("Disconnecting {} from host {}", source, array_host);
            self.array.disconnect_host(array_host, source).await?;
        }
        self.hosts.rescan_scsi(&data.host, Rescan::Remove).await?;

        for array_host in &connected_hosts {
            info!("Connecting {} to host {}", new_name, array_host);
            self.array.connect_host(array_host, &new_name).await?;
        }
        self.hosts.rescan_scsi(&data.host, Rescan::Add).await?;
        self.settle().await;

        self.hosts
            .mount(&data.host, &mapper_device(&restored.serial), &data.mount_point)
            .await?;

        let mounted = self.hosts.volume_serial(&data.host, &data.mount_point).await?;
        if !mounted.matches_array_serial(&restored.serial) {
            return Err(Error::storage(
                "verify remount",
                format!("{} has serial {}, expected volume {}", data.mount_point, mounted, new_name),
            ));
        }
        Ok(new_name)
    }

    async fn settle(&self) {
        let pause = Duration::from_secs(self.config.restore.rescan_settle_secs);
        if !pause.is_zero() {
            info!("Waiting {:?} for the rescanned devices to settle", pause);
            tokio::time::sleep(pause).await;
        }
    }
}

/// Multipath device of a FlashArray volume
fn mapper_device(array_serial: &str) -> String {
    format!(
        "/dev/mapper/{}",
        Serial::new(format!("{}{}", FLASHARRAY_MAPPER_PREFIX, array_serial))
    )
}
