//! Snapshot Orchestrator - The protocol driver
//!
//! Runs the backup and restore protocols against the collaborator ports:
//! - Application-consistent backup (prepare, freeze, snapshot, unfreeze,
//!   confirm or abandon)
//! - Crash-consistent backup through a protection group snapshot
//! - Restore from a catalog entry (stop, restore volume, remount, recover)
//!
//! Every step is awaited before the next one starts. The target host of a
//! run is held in a [`RunContext`], never in shared state.

pub mod backup;
pub mod freeze;
pub mod poll;
pub mod restore;

pub use backup::{BackupOutcome, BackupRequest};
pub use poll::PollPolicy;
pub use restore::{RestoreConfig, RestoreOutcome, RestoreRequest, RestoreStrategy};

use crate::domain::model::{DeploymentMode, MountTarget, VolumeRole};
use crate::domain::ports::{
    ArrayClientRef, DatabaseControlRef, OperatorPromptRef, RemoteExecutorRef, VCenterCredentials,
    VCenterLookupRef,
};
use crate::error::{Error, Result};
use crate::hana::HanaControl;
use crate::host::{HostConfig, HostOps};
use crate::resolver::VolumeResolver;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// HANA host the run starts from
    pub hana_host: String,
    /// Two digit instance number
    pub instance_number: String,
    pub deployment: DeploymentMode,
    pub host: HostConfig,
    /// Needed only when a persistence volume is a virtual disk
    pub vcenter: Option<VCenterCredentials>,
    pub polling: PollPolicy,
    pub restore: RestoreConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            hana_host: "localhost".to_string(),
            instance_number: "00".to_string(),
            deployment: DeploymentMode::ScaleUp,
            host: HostConfig::default(),
            vcenter: None,
            polling: PollPolicy::default(),
            restore: RestoreConfig::default(),
        }
    }
}

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub database: DatabaseControlRef,
    pub shell: RemoteExecutorRef,
    pub array: ArrayClientRef,
    pub vcenter: Option<VCenterLookupRef>,
    pub prompt: OperatorPromptRef,
}

// =============================================================================
// Run Context
// =============================================================================

/// Per-run state resolved once at the start of a protocol
pub struct RunContext {
    /// Control session, pointed at the host that accepts control commands
    pub control: HanaControl,
    pub sid: String,
}

impl RunContext {
    pub fn control_host(&self) -> &str {
        self.control.host()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct SnapshotOrchestrator {
    config: OrchestratorConfig,
    database: DatabaseControlRef,
    hosts: Arc<HostOps>,
    array: ArrayClientRef,
    resolver: VolumeResolver,
    prompt: OperatorPromptRef,
}

impl SnapshotOrchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let hosts = Arc::new(HostOps::new(
            collaborators.shell,
            &config.host,
            config.instance_number.clone(),
        ));

        let mut resolver = VolumeResolver::new(collaborators.array.clone(), hosts.clone());
        if let Some(lookup) = collaborators.vcenter {
            resolver = resolver.with_vcenter(lookup, config.vcenter.clone());
        }

        Self {
            config,
            database: collaborators.database,
            hosts,
            array: collaborators.array,
            resolver,
            prompt: collaborators.prompt,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Open the control session and pin the control host.
    ///
    /// A multi-tenant scale-out system is controlled through its master
    /// nameserver host.
    pub async fn open_context(&self) -> Result<RunContext> {
        let control = HanaControl::connect(self.database.clone(), self.config.hana_host.clone()).await?;

        let control = if self.config.deployment.is_scale_out() && control.is_multi_tenant() {
            let nameserver = control.nameserver_host().await?;
            let host = self.config.deployment.qualify_host(&nameserver);
            info!("Control commands go to the master nameserver {}", host);
            control.retarget(host)
        } else {
            control
        };

        let sid = control.instance_id().await?;
        if sid.is_empty() {
            return Err(Error::control("instance id", "empty system id"));
        }
        debug!("Run context: SID {} via {}", sid, control.host());
        Ok(RunContext { control, sid })
    }

    /// Mount points holding `role`, per host
    async fn persistence_targets(&self, ctx: &RunContext, role: VolumeRole) -> Result<Vec<MountTarget>> {
        let targets = match &self.config.deployment {
            DeploymentMode::ScaleUp => {
                let mount_point = ctx.control.basepath_mount(role, &ctx.sid).await?;
                vec![MountTarget::new(self.config.hana_host.clone(), mount_point, role)]
            }
            DeploymentMode::ScaleOut { .. } => ctx
                .control
                .attached_storages(role)
                .await?
                .into_iter()
                .map(|storage| {
                    MountTarget::new(self.config.deployment.qualify_host(&storage.host), storage.path, role)
                })
                .collect(),
        };

        if targets.is_empty() {
            return Err(Error::control(
                role.basepath_key(),
                format!("no {} volume found for {}", role, ctx.sid),
            ));
        }
        Ok(targets)
    }
}
