//! Configuration file
//!
//! Non-secret settings can be kept in a YAML file. Passwords are never read
//! from it; they are supplied on the command line or through the
//! environment and placed into the loaded configuration afterwards.
//!
//! ```yaml
//! hana:
//!   host: hana01
//!   instance_number: "00"
//!   deployment:
//!     mode: scale-out
//!     domain: lab.example.com
//! flasharray:
//!   endpoint: flasharray01.lab.example.com
//!   user: pureuser
//! polling:
//!   stop_deadline_secs: 600
//! ```

use crate::adapters::{FlashArrayConfig, HdbsqlConfig, VSphereConfig};
use crate::domain::model::DeploymentMode;
use crate::error::{Error, Result};
use crate::host::HostConfig;
use crate::orchestrator::{OrchestratorConfig, PollPolicy, RestoreConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// HANA instance and SQL client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HanaConfig {
    /// Host the run starts from; in scale-out any host of the system
    pub host: String,
    /// Two digit instance number
    pub instance_number: String,
    pub deployment: DeploymentMode,
    pub sql: HdbsqlConfig,
}

impl Default for HanaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            instance_number: "00".to_string(),
            deployment: DeploymentMode::ScaleUp,
            sql: HdbsqlConfig::default(),
        }
    }
}

/// Everything the binary needs to build an orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hana: HanaConfig,
    pub host: HostConfig,
    pub flasharray: FlashArrayConfig,
    pub vsphere: VSphereConfig,
    pub polling: PollPolicy,
    pub restore: RestoreConfig,
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    /// Reject settings no run can succeed with
    pub fn validate(&self) -> Result<()> {
        let nr = &self.hana.instance_number;
        if nr.len() != 2 || !nr.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Configuration(format!(
                "instance number must be two digits, got '{}'",
                nr
            )));
        }
        if self.hana.host.trim().is_empty() {
            return Err(Error::Configuration("HANA host is not set".into()));
        }
        if self.flasharray.endpoint.trim().is_empty() {
            return Err(Error::Configuration("FlashArray endpoint is not set".into()));
        }
        if let DeploymentMode::ScaleOut { domain } = &self.hana.deployment {
            if domain.trim().is_empty() {
                return Err(Error::Configuration("scale-out deployment needs a domain".into()));
            }
        }
        Ok(())
    }

    /// SQL client settings with the instance number filled in
    pub fn hdbsql(&self) -> HdbsqlConfig {
        HdbsqlConfig {
            instance_number: self.hana.instance_number.clone(),
            ..self.hana.sql.clone()
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            hana_host: self.hana.host.clone(),
            instance_number: self.hana.instance_number.clone(),
            deployment: self.hana.deployment.clone(),
            host: self.host.clone(),
            vcenter: self.vsphere.credentials(),
            polling: self.polling.clone(),
            restore: self.restore.clone(),
        }
    }
}
