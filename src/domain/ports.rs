//! Domain Ports - Collaborator contracts of the snapshot orchestrator
//!
//! These traits define the boundaries between the orchestration protocol and
//! the external systems it drives: the HANA SQL control plane, the guest OS
//! shell, the FlashArray and vCenter. The operator interaction (catalog
//! selection, destructive-step confirmation) is a port as well, so the
//! protocol never touches a terminal directly.

use crate::domain::model::{BackupId, CatalogEntry, Serial};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Credentials
// =============================================================================

/// User name and password for one collaborator
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// vCenter address and login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VCenterCredentials {
    pub address: String,
    pub login: Credentials,
}

// =============================================================================
// Database Control Port
// =============================================================================

/// Which SQL endpoint of the instance a command goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Routing {
    /// The system database of a multi-tenant system
    SystemDatabase,
    /// A tenant, or the only database of a single-container system
    Tenant,
}

/// A control command target: host plus routing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub host: String,
    pub routing: Routing,
}

/// One result row, columns rendered as text (`None` for SQL NULL)
pub type Row = Vec<Option<String>>;

/// Port for HANA SQL control commands
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    /// Execute one statement. Statements without a result set yield an
    /// empty sequence.
    async fn execute(&self, command: &str, route: &Route) -> Result<Vec<Row>>;
}

// =============================================================================
// Remote Execution Port
// =============================================================================

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code.map_or(true, |code| code == 0)
    }

    pub fn from_text(stdout: &str, stderr: &str, exit_code: Option<u32>) -> Self {
        Self {
            stdout: stdout.lines().map(str::to_string).collect(),
            stderr: stderr.lines().map(str::to_string).collect(),
            exit_code,
        }
    }
}

/// An open shell session on one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command and wait for it to finish
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Port for opening shell sessions on database hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(&self, host: &str, login: &Credentials) -> Result<Box<dyn RemoteSession>>;
}

// =============================================================================
// Array Client Port
// =============================================================================

/// A volume as listed by the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayVolume {
    pub name: String,
    pub serial: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// A volume snapshot; snapshots are named `<volume>.<suffix>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub name: String,
    pub serial: String,
    pub source: String,
    #[serde(default)]
    pub created: Option<String>,
}

/// Protection group as reported by the array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionGroupInfo {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub volumes: Vec<String>,
}

/// Snapshot of a whole protection group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgroupSnapshot {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// A host object on the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayHost {
    pub name: String,
}

/// A private volume connection of a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConnection {
    /// Host name
    pub name: String,
    /// Connected volume name
    pub vol: String,
    #[serde(default)]
    pub lun: Option<u32>,
}

/// Key/value tag attached to a volume (vVol metadata)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTag {
    /// Volume the tag belongs to
    pub name: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Name of the vVol protocol endpoint volume, never a data volume
pub const PROTOCOL_ENDPOINT_VOLUME: &str = "pure-protocol-endpoint";

/// Tag key holding the array volume name of a vVol
pub const PURE_VVOL_ID_TAG: &str = "PURE_VVOL_ID";

/// Port for FlashArray operations
#[async_trait]
pub trait ArrayClient: Send + Sync {
    async fn list_volumes(&self) -> Result<Vec<ArrayVolume>>;

    async fn get_volume(&self, name: &str) -> Result<ArrayVolume>;

    /// Snapshots of one volume
    async fn list_volume_snapshots(&self, name: &str) -> Result<Vec<VolumeSnapshot>>;

    async fn create_snapshot(&self, volume: &str, suffix: &str) -> Result<VolumeSnapshot>;

    /// Copy a volume or snapshot to `destination`, replacing it when
    /// `overwrite` is set
    async fn copy_volume(&self, source: &str, destination: &str, overwrite: bool) -> Result<ArrayVolume>;

    /// `None` when the group does not exist
    async fn get_pgroup(&self, name: &str) -> Result<Option<ProtectionGroupInfo>>;

    /// Fails with `ResourceExists` when another caller created it first
    async fn create_pgroup(&self, name: &str) -> Result<ProtectionGroupInfo>;

    /// Adding a volume that is already a member succeeds
    async fn add_volume_to_pgroup(&self, volume: &str, pgroup: &str) -> Result<()>;

    async fn create_pgroup_snapshot(&self, pgroup: &str) -> Result<PgroupSnapshot>;

    async fn list_hosts(&self) -> Result<Vec<ArrayHost>>;

    async fn list_host_connections(&self, host: &str) -> Result<Vec<HostConnection>>;

    async fn connect_host(&self, host: &str, volume: &str) -> Result<HostConnection>;

    async fn disconnect_host(&self, host: &str, volume: &str) -> Result<()>;

    /// Tags of the vVols whose value matches a vSphere backing object id
    async fn list_virtual_volume(&self, backing_object_id: &str) -> Result<Vec<VolumeTag>>;
}

// =============================================================================
// vCenter Lookup Port
// =============================================================================

/// Virtual disk backing matched to a serial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VvolBacking {
    pub uuid: String,
    pub backing_object_id: String,
}

/// Port for mapping a virtual disk serial to its vVol backing
#[async_trait]
pub trait VCenterLookup: Send + Sync {
    async fn resolve_vvol_backing(
        &self,
        serial: &Serial,
        credentials: &VCenterCredentials,
    ) -> Result<Option<VvolBacking>>;
}

// =============================================================================
// Operator Prompt Port
// =============================================================================

/// What the operator is asked to approve before the destructive restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreNotice {
    pub backup_id: BackupId,
    pub snapshot: String,
    pub overwrite: bool,
    /// Overwrite was forced because the data volume is a virtual disk
    pub overwrite_forced: bool,
}

/// Decision points of the restore protocol
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Pick a catalog entry by `catalog_id`; `None` ends the restore
    async fn select_backup(&self, entries: &[CatalogEntry]) -> Result<Option<usize>>;

    /// Approve the irreversible part of the restore
    async fn confirm_restore(&self, notice: &RestoreNotice) -> Result<bool>;

    /// Show a message without asking anything
    async fn notify(&self, message: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DatabaseControlRef = Arc<dyn DatabaseControl>;
pub type RemoteExecutorRef = Arc<dyn RemoteExecutor>;
pub type ArrayClientRef = Arc<dyn ArrayClient>;
pub type VCenterLookupRef = Arc<dyn VCenterLookup>;
pub type OperatorPromptRef = Arc<dyn OperatorPrompt>;

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
