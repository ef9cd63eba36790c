//! Error types for the snapshot orchestrator
//!
//! Provides structured error types for volume resolution, the HANA control
//! plane, the guest operating system, the FlashArray and the restore flow.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Volume Resolution Errors
    // =========================================================================
    #[error("Mount point {mount_point} is not mounted on {host}")]
    VolumeNotMounted { host: String, mount_point: String },

    #[error("Device {device} on {host} does not report a storage serial number")]
    SerialLookup { host: String, device: String },

    #[error("No FlashArray volume matches serial {serial}")]
    VolumeNotFound { serial: String },

    #[error("Volume {serial} is a virtual disk but no vCenter credentials were supplied")]
    VCenterCredentialsMissing { serial: String },

    #[error("No host connection on the array references the volume with serial {serial}")]
    HostConnectionNotFound { serial: String },

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Control command failed: {command}: {reason}")]
    ControlCommand { command: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Storage operation failed: {operation}: {reason}")]
    StorageOperation { operation: String, reason: String },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("No storage snapshot for backup {backup_id} is present on the array")]
    SnapshotNotFound { backup_id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Remote Execution Errors
    // =========================================================================
    #[error("Remote execution failed on {host}: {reason}")]
    RemoteExecution { host: String, reason: String },

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    #[error("Backup {backup_id} is {state}: {reason}")]
    StateInconsistency {
        backup_id: String,
        state: String,
        reason: String,
    },

    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("{original}; abandoning backup {backup_id} also failed: {compensation}")]
    CompensationFailed {
        backup_id: String,
        original: Box<Error>,
        compensation: Box<Error>,
    },

    #[error("Restore failed after the instance was stopped, continue with manual recovery: {0}")]
    ManualRecoveryRequired(Box<Error>),

    #[error("Operator prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if a polling loop may retry after this error
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RemoteExecution { .. } => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error happened before anything on the array or the
    /// database changed
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Error::VolumeNotMounted { .. }
                | Error::SerialLookup { .. }
                | Error::VolumeNotFound { .. }
                | Error::VCenterCredentialsMissing { .. }
                | Error::HostConnectionNotFound { .. }
        )
    }

    pub(crate) fn storage(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::StorageOperation {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn remote(host: impl Into<String>, reason: impl ToString) -> Self {
        Error::RemoteExecution {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn control(command: impl Into<String>, reason: impl ToString) -> Self {
        Error::ControlCommand {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
