//! Domain Model - Backups, volumes and protection groups
//!
//! Everything here is plain data. State transitions of a [`BackupRecord`]
//! are checked so a terminal record can never be confirmed or abandoned
//! twice.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// WWID vendor prefix of volumes attached directly from a FlashArray
pub const FLASHARRAY_SERIAL_PREFIX: &str = "3624a937";

/// WWID vendor prefix of VMware virtual disks
pub const VMWARE_SERIAL_PREFIX: &str = "36000c29";

/// Device-mapper name prefix of a FlashArray volume (WWID minus the array serial)
pub const FLASHARRAY_MAPPER_PREFIX: &str = "3624a9370";

// =============================================================================
// Serial Numbers
// =============================================================================

/// Where a volume with a given OS-visible serial lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialKind {
    /// Attached directly from the FlashArray
    Direct,
    /// VMware virtual disk, possibly backed by a vVol
    VirtualDisk,
    /// Any other vendor
    Unsupported,
}

impl std::fmt::Display for SerialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialKind::Direct => write!(f, "direct"),
            SerialKind::VirtualDisk => write!(f, "virtual-disk"),
            SerialKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// OS-visible storage serial (WWID) of a block device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(String);

impl Serial {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify by vendor prefix
    pub fn kind(&self) -> SerialKind {
        if self.0.starts_with(FLASHARRAY_SERIAL_PREFIX) {
            SerialKind::Direct
        } else if self.0.starts_with(VMWARE_SERIAL_PREFIX) {
            SerialKind::VirtualDisk
        } else {
            SerialKind::Unsupported
        }
    }

    /// Whether an array-side serial identifies this device.
    ///
    /// The OS serial carries a storage prefix the array does not report, so
    /// the array serial is matched as a case-insensitive substring.
    pub fn matches_array_serial(&self, array_serial: &str) -> bool {
        let array_serial = array_serial.trim().to_lowercase();
        !array_serial.is_empty() && self.0.contains(&array_serial)
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Backup Records
// =============================================================================

/// Identifier assigned by the database when a snapshot is prepared
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for BackupId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a data snapshot in the backup catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupState {
    Prepared,
    Confirmed,
    Abandoned,
}

impl BackupState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupState::Prepared)
    }
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupState::Prepared => write!(f, "PREPARED"),
            BackupState::Confirmed => write!(f, "CONFIRMED"),
            BackupState::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// One in-flight or completed snapshot operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: BackupId,
    pub state: BackupState,
    /// Array-side snapshot identifiers, one per physical volume
    pub storage_snapshot_ids: Vec<String>,
}

impl BackupRecord {
    /// A freshly prepared record
    pub fn prepared(backup_id: BackupId) -> Self {
        Self {
            backup_id,
            state: BackupState::Prepared,
            storage_snapshot_ids: Vec::new(),
        }
    }

    pub fn record_snapshot(&mut self, snapshot_id: impl Into<String>) {
        self.storage_snapshot_ids.push(snapshot_id.into());
    }

    pub fn confirm(&mut self) -> Result<()> {
        self.transition(BackupState::Confirmed)
    }

    pub fn abandon(&mut self) -> Result<()> {
        self.transition(BackupState::Abandoned)
    }

    fn transition(&mut self, next: BackupState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::StateInconsistency {
                backup_id: self.backup_id.to_string(),
                state: self.state.to_string(),
                reason: format!("cannot move a terminal backup to {}", next),
            });
        }
        self.state = next;
        Ok(())
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// Which persistence a volume holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeRole {
    Data,
    Log,
}

impl VolumeRole {
    /// `global.ini [persistence]` key holding the base path for this role
    pub fn basepath_key(&self) -> &'static str {
        match self {
            VolumeRole::Data => "basepath_datavolumes",
            VolumeRole::Log => "basepath_logvolumes",
        }
    }
}

impl std::fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeRole::Data => write!(f, "data"),
            VolumeRole::Log => write!(f, "log"),
        }
    }
}

/// A mount point on a host, before it is mapped to the array
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountTarget {
    pub host: String,
    pub mount_point: String,
    pub role: VolumeRole,
}

impl MountTarget {
    pub fn new(host: impl Into<String>, mount_point: impl Into<String>, role: VolumeRole) -> Self {
        Self {
            host: host.into(),
            mount_point: mount_point.into(),
            role,
        }
    }
}

/// How a resolved volume is reached on the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VolumeLocation {
    /// Volume attached directly to the host
    Direct { volume: String },
    /// vVol behind a VMware virtual disk
    VirtualDisk {
        volume: String,
        backing_object_id: String,
    },
}

impl VolumeLocation {
    pub fn volume_name(&self) -> &str {
        match self {
            VolumeLocation::Direct { volume } | VolumeLocation::VirtualDisk { volume, .. } => volume,
        }
    }

    pub fn is_virtual_disk(&self) -> bool {
        matches!(self, VolumeLocation::VirtualDisk { .. })
    }
}

/// One physical volume participating in a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    pub host: String,
    pub mount_point: String,
    pub role: VolumeRole,
    pub serial_number: Serial,
    /// Resolved array location; `None` until resolution succeeded
    pub location: Option<VolumeLocation>,
}

impl VolumeDescriptor {
    pub fn array_volume_name(&self) -> Option<&str> {
        self.location.as_ref().map(VolumeLocation::volume_name)
    }

    pub fn target(&self) -> MountTarget {
        MountTarget::new(self.host.clone(), self.mount_point.clone(), self.role)
    }
}

// =============================================================================
// Protection Groups
// =============================================================================

/// Array-side grouping of volumes for an atomic multi-volume snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionGroup {
    pub name: String,
    pub members: BTreeSet<String>,
}

impl ProtectionGroup {
    /// Deterministic group name for a database
    pub fn name_for(database: &str) -> String {
        format!("SAPHANA-{}-CrashConsistency", database)
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
        }
    }
}

// =============================================================================
// Backup Catalog
// =============================================================================

/// A data snapshot listed in the backup catalog, numbered for selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// 1-based position in the most-recent-first listing
    pub catalog_id: usize,
    pub backup_id: BackupId,
    pub started_at: chrono::NaiveDateTime,
}

// =============================================================================
// Deployment
// =============================================================================

/// HANA deployment topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DeploymentMode {
    ScaleUp,
    ScaleOut {
        /// DNS domain appended to the HANA host names
        domain: String,
    },
}

impl DeploymentMode {
    /// Fully qualified name for a host reported by HANA
    pub fn qualify_host(&self, host: &str) -> String {
        match self {
            DeploymentMode::ScaleUp => host.to_string(),
            DeploymentMode::ScaleOut { domain } if domain.is_empty() => host.to_string(),
            DeploymentMode::ScaleOut { domain } => format!("{}.{}", host, domain.trim_start_matches('.')),
        }
    }

    pub fn is_scale_out(&self) -> bool {
        matches!(self, DeploymentMode::ScaleOut { .. })
    }
}

impl Default for DeploymentMode {
    fn default() -> Self {
        DeploymentMode::ScaleUp
    }
}
