//! Volume Resolver
//!
//! Maps a mount point on a database host to the FlashArray volume behind
//! it. The OS serial is classified by vendor prefix:
//!
//! - `Direct`: the array volume list is scanned for the serial.
//! - `VirtualDisk`: vCenter maps the serial to a vVol backing object, the
//!   array's vVol tags name the volume, and that volume's serial goes
//!   through the same scan.
//!
//! Both paths end in [`match_serial`], so a serial either resolves to one
//! volume name or fails with [`Error::VolumeNotFound`].

use crate::domain::model::{MountTarget, Serial, SerialKind, VolumeDescriptor, VolumeLocation};
use crate::domain::ports::{
    ArrayClientRef, ArrayVolume, VCenterCredentials, VCenterLookupRef, PURE_VVOL_ID_TAG,
};
use crate::error::{Error, Result};
use crate::host::HostOps;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct VolumeResolver {
    array: ArrayClientRef,
    hosts: Arc<HostOps>,
    vcenter: Option<VCenterLookupRef>,
    vcenter_credentials: Option<VCenterCredentials>,
}

impl VolumeResolver {
    pub fn new(array: ArrayClientRef, hosts: Arc<HostOps>) -> Self {
        Self {
            array,
            hosts,
            vcenter: None,
            vcenter_credentials: None,
        }
    }

    /// Enable virtual-disk resolution. Without credentials a virtual disk
    /// fails with `VCenterCredentialsMissing`.
    pub fn with_vcenter(mut self, lookup: VCenterLookupRef, credentials: Option<VCenterCredentials>) -> Self {
        self.vcenter = Some(lookup);
        self.vcenter_credentials = credentials;
        self
    }

    /// OS serial of the device mounted at the target
    pub async fn resolve_serial(&self, host: &str, mount_point: &str) -> Result<Serial> {
        self.hosts.volume_serial(host, mount_point).await
    }

    /// Array volume for a serial
    pub async fn resolve_volume_name(&self, serial: &Serial) -> Result<VolumeLocation> {
        match serial.kind() {
            SerialKind::Direct => {
                let volumes = self.array.list_volumes().await?;
                let volume = match_serial(&volumes, serial)?;
                Ok(VolumeLocation::Direct { volume })
            }
            SerialKind::VirtualDisk => self.resolve_virtual_disk(serial).await,
            SerialKind::Unsupported => {
                warn!("Serial {} is neither a FlashArray volume nor a virtual disk", serial);
                Err(Error::VolumeNotFound {
                    serial: serial.to_string(),
                })
            }
        }
    }

    async fn resolve_virtual_disk(&self, serial: &Serial) -> Result<VolumeLocation> {
        let not_found = || Error::VolumeNotFound {
            serial: serial.to_string(),
        };

        let (lookup, credentials) = match (&self.vcenter, &self.vcenter_credentials) {
            (Some(lookup), Some(credentials)) => (lookup, credentials),
            _ => {
                return Err(Error::VCenterCredentialsMissing {
                    serial: serial.to_string(),
                })
            }
        };

        let backing = lookup
            .resolve_vvol_backing(serial, credentials)
            .await?
            .ok_or_else(not_found)?;
        debug!("Virtual disk {} is backed by {}", serial, backing.backing_object_id);

        let tags = self.array.list_virtual_volume(&backing.backing_object_id).await?;
        let vvol_name = tags
            .iter()
            .find(|tag| tag.key == PURE_VVOL_ID_TAG)
            .map(|tag| tag.name.clone())
            .ok_or_else(not_found)?;

        let vvol = self.array.get_volume(&vvol_name).await?;
        let volumes = self.array.list_volumes().await?;
        let volume = match_serial(&volumes, &Serial::new(vvol.serial.as_str())).map_err(|_| not_found())?;

        Ok(VolumeLocation::VirtualDisk {
            volume,
            backing_object_id: backing.backing_object_id,
        })
    }

    /// Serial and array volume for a mount target
    pub async fn resolve(&self, target: &MountTarget) -> Result<VolumeDescriptor> {
        let serial = self.resolve_serial(&target.host, &target.mount_point).await?;
        let location = self.resolve_volume_name(&serial).await?;
        info!(
            "{}:{} ({}) resolved to array volume {}",
            target.host,
            target.mount_point,
            target.role,
            location.volume_name()
        );
        Ok(VolumeDescriptor {
            host: target.host.clone(),
            mount_point: target.mount_point.clone(),
            role: target.role,
            serial_number: serial,
            location: Some(location),
        })
    }

    /// Resolve every target, failing on the first error
    pub async fn resolve_all(&self, targets: &[MountTarget]) -> Result<Vec<VolumeDescriptor>> {
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            resolved.push(self.resolve(target).await?);
        }
        Ok(resolved)
    }
}

/// Name of the single volume whose array serial is contained in `serial`
pub fn match_serial(volumes: &[ArrayVolume], serial: &Serial) -> Result<String> {
    volumes
        .iter()
        .find(|volume| serial.matches_array_serial(&volume.serial))
        .map(|volume| volume.name.clone())
        .ok_or_else(|| Error::VolumeNotFound {
            serial: serial.to_string(),
        })
}
