//! Pure HANA Snapshot - Storage snapshot backups for SAP HANA on FlashArray
//!
//! Coordinates SAP HANA, the database hosts and a Pure Storage FlashArray to
//! take application-consistent or crash-consistent storage snapshots of the
//! HANA persistence, and to restore the data volume from such a snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        SnapshotOrchestrator                          │
//! │   backup: prepare → resolve → freeze → snapshot → thaw → confirm     │
//! │   restore: select → stop → copy → rescan → mount → recover           │
//! ├──────────────────┬──────────────────┬────────────────────────────────┤
//! │   HanaControl    │     HostOps      │        VolumeResolver          │
//! │  (SQL commands)  │  (OS commands)   │  (mount → serial → volume)     │
//! ├──────────────────┴──────────────────┴────────────────────────────────┤
//! │                             Ports                                    │
//! │  DatabaseControl  RemoteExecutor  ArrayClient  VCenterLookup  Prompt │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                            Adapters                                  │
//! │     hdbsql        russh         FlashArray REST  vCenter   dialoguer │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Snapshot model and port traits
//! - [`hana`]: HANA control plane commands
//! - [`host`]: Guest operating system commands
//! - [`resolver`]: Mount point to array volume resolution
//! - [`orchestrator`]: Backup and restore protocols
//! - [`adapters`]: Concrete collaborators
//! - [`config`]: Configuration file
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod hana;
pub mod host;
pub mod orchestrator;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{AppConfig, HanaConfig};

pub use domain::model::{
    BackupId, BackupRecord, BackupState, CatalogEntry, DeploymentMode, MountTarget, ProtectionGroup, Serial,
    SerialKind, VolumeDescriptor, VolumeLocation, VolumeRole,
};

pub use domain::ports::{
    ArrayClient, Credentials, DatabaseControl, OperatorPrompt, RemoteExecutor, VCenterCredentials, VCenterLookup,
};

pub use error::{Error, Result};

pub use orchestrator::{
    BackupOutcome, BackupRequest, Collaborators, OrchestratorConfig, PollPolicy, RestoreConfig, RestoreOutcome,
    RestoreRequest, RestoreStrategy, SnapshotOrchestrator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
