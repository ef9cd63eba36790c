//! vCenter virtual disk lookup
//!
//! Enumerates virtual machines through the vCenter REST API, then reads
//! each machine's device list through the VI/JSON API until a disk whose
//! backing UUID matches the guest-visible serial is found. A VMware disk
//! serial is `3` followed by the backing UUID without dashes.

use crate::domain::model::Serial;
use crate::domain::ports::{Credentials, VCenterCredentials, VCenterLookup, VvolBacking};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";

/// vCenter connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VSphereConfig {
    /// vCenter address; unset when no persistence volume is a virtual disk
    pub address: Option<String>,
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    /// Verify the vCenter certificate
    pub verify_tls: bool,
    pub timeout_secs: u64,
    /// VI/JSON API release used in request paths
    pub vim_release: String,
}

impl Default for VSphereConfig {
    fn default() -> Self {
        Self {
            address: None,
            user: None,
            password: None,
            verify_tls: false,
            timeout_secs: 60,
            vim_release: "8.0.1.0".to_string(),
        }
    }
}

impl std::fmt::Debug for VSphereConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VSphereConfig")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("vim_release", &self.vim_release)
            .finish()
    }
}

impl VSphereConfig {
    /// Login for lookups; `None` unless address, user and password are all set
    pub fn credentials(&self) -> Option<VCenterCredentials> {
        match (&self.address, &self.user, &self.password) {
            (Some(address), Some(user), Some(password)) => Some(VCenterCredentials {
                address: address.clone(),
                login: Credentials::new(user.clone(), password.clone()),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct VmConfig {
    #[serde(default)]
    hardware: VmHardware,
}

#[derive(Debug, Default, Deserialize)]
struct VmHardware {
    #[serde(default)]
    device: Vec<VirtualDevice>,
}

#[derive(Debug, Deserialize)]
struct VirtualDevice {
    #[serde(default)]
    backing: Option<DeviceBacking>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceBacking {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    backing_object_id: Option<String>,
}

/// Guest-visible serial of a disk with this backing UUID
fn disk_serial(uuid: &str) -> String {
    format!("3{}", uuid.replace('-', "")).to_lowercase()
}

fn find_backing(config: &VmConfig, serial: &Serial) -> Option<VvolBacking> {
    config
        .hardware
        .device
        .iter()
        .filter_map(|device| device.backing.as_ref())
        .find_map(|backing| {
            let uuid = backing.uuid.as_deref()?;
            if disk_serial(uuid) != serial.as_str() {
                return None;
            }
            // VMFS disks match too but carry no vVol object id
            let backing_object_id = backing.backing_object_id.as_deref()?;
            Some(VvolBacking {
                uuid: uuid.to_string(),
                backing_object_id: backing_object_id.to_string(),
            })
        })
}

/// [`VCenterLookup`] over the vCenter REST and VI/JSON APIs
pub struct VSphereClient {
    http: Client,
    config: VSphereConfig,
}

impl VSphereClient {
    pub fn new(config: VSphereConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn vim_url(&self, address: &str, path: &str) -> String {
        format!("https://{}/sdk/vim25/{}/{}", address, self.config.vim_release, path)
    }

    async fn rest_login(&self, credentials: &VCenterCredentials) -> Result<String> {
        let response = self
            .http
            .post(format!("https://{}/api/session", credentials.address))
            .basic_auth(&credentials.login.user, Some(&credentials.login.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Configuration(format!(
                "vCenter {} rejected the login of {}: {}",
                credentials.address,
                credentials.login.user,
                response.status()
            )));
        }
        Ok(response.json::<String>().await?)
    }

    async fn vim_login(&self, credentials: &VCenterCredentials) -> Result<String> {
        let response = self
            .http
            .post(self.vim_url(&credentials.address, "SessionManager/SessionManager/Login"))
            .json(&serde_json::json!({
                "userName": credentials.login.user,
                "password": credentials.login.password,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Configuration(format!(
                "vCenter {} rejected the VI/JSON login of {}: {}",
                credentials.address,
                credentials.login.user,
                response.status()
            )));
        }
        response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("vCenter VI/JSON login returned no session id".into()))
    }

    async fn list_vms(&self, address: &str, session: &str) -> Result<Vec<VmSummary>> {
        let response = self
            .http
            .get(format!("https://{}/api/vcenter/vm", address))
            .header(SESSION_HEADER, session)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn vm_config(&self, address: &str, session: &str, vm: &str) -> Result<VmConfig> {
        let path = format!("VirtualMachine/{}/config", urlencoding::encode(vm));
        let response = self
            .http
            .get(self.vim_url(address, &path))
            .header(SESSION_HEADER, session)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        if text.trim().is_empty() || text.trim() == "null" {
            // templates and inaccessible machines have no config
            return Ok(VmConfig::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn search(
        &self,
        address: &str,
        rest_session: &str,
        vim_session: &str,
        serial: &Serial,
    ) -> Result<Option<VvolBacking>> {
        let vms = self.list_vms(address, rest_session).await?;
        debug!("Searching {} virtual machines on {} for disk {}", vms.len(), address, serial);
        for vm in &vms {
            let config = self.vm_config(address, vim_session, &vm.vm).await?;
            if let Some(backing) = find_backing(&config, serial) {
                info!("Disk {} is backed by vVol {} on VM {}", serial, backing.backing_object_id, vm.name);
                return Ok(Some(backing));
            }
        }
        Ok(None)
    }

    async fn logout(&self, address: &str, rest_session: &str, vim_session: &str) {
        let rest = self
            .http
            .delete(format!("https://{}/api/session", address))
            .header(SESSION_HEADER, rest_session)
            .send()
            .await;
        let vim = self
            .http
            .post(self.vim_url(address, "SessionManager/SessionManager/Logout"))
            .header(SESSION_HEADER, vim_session)
            .send()
            .await;
        if let Err(e) = rest.and(vim) {
            warn!("vCenter logout from {} failed: {}", address, e);
        }
    }
}

#[async_trait]
impl VCenterLookup for VSphereClient {
    async fn resolve_vvol_backing(
        &self,
        serial: &Serial,
        credentials: &VCenterCredentials,
    ) -> Result<Option<VvolBacking>> {
        let address = credentials.address.as_str();
        let rest_session = self.rest_login(credentials).await?;
        let vim_session = match self.vim_login(credentials).await {
            Ok(session) => session,
            Err(e) => {
                self.logout(address, &rest_session, "").await;
                return Err(e);
            }
        };

        let result = self.search(address, &rest_session, &vim_session, serial).await;
        self.logout(address, &rest_session, &vim_session).await;
        result
    }
}
