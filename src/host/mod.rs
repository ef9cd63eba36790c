//! Guest OS Operations
//!
//! Shell commands issued on the database hosts through the
//! [`RemoteExecutor`](crate::domain::ports::RemoteExecutor) port: mount and
//! serial discovery, filesystem freeze, instance stop/start status, SCSI
//! rescans and the system database recovery. One session is opened per
//! logical operation and always closed again.

pub mod parse;

pub use parse::InstanceStatus;

use crate::domain::model::Serial;
use crate::domain::ports::{CommandOutput, Credentials, RemoteExecutorRef};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SAPCONTROL: &str = "/usr/sap/hostctrl/exe/sapcontrol";
const FSFREEZE: &str = "/sbin/fsfreeze";

// =============================================================================
// Configuration
// =============================================================================

/// Guest OS access
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// OS user for mount, freeze and rescan commands (needs sudo)
    pub user: String,
    #[serde(skip)]
    pub password: String,
    /// Password of `<sid>adm`, needed only to recover the system database
    #[serde(skip)]
    pub sidadm_password: Option<String>,
    pub ssh_port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            password: String::new(),
            sidadm_password: None,
            ssh_port: 22,
        }
    }
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("user", &self.user)
            .field("sidadm_password", &self.sidadm_password.as_ref().map(|_| "<redacted>"))
            .field("ssh_port", &self.ssh_port)
            .finish()
    }
}

/// Direction of a SCSI bus rescan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rescan {
    /// Pick up newly connected volumes
    Add,
    /// Drop devices whose volume was disconnected
    Remove,
}

impl Rescan {
    fn flag(&self) -> &'static str {
        match self {
            Rescan::Add => "-a",
            Rescan::Remove => "-r",
        }
    }
}

// =============================================================================
// Host Operations
// =============================================================================

pub struct HostOps {
    shell: RemoteExecutorRef,
    login: Credentials,
    sidadm_password: Option<String>,
    instance_number: String,
}

impl HostOps {
    pub fn new(shell: RemoteExecutorRef, config: &HostConfig, instance_number: impl Into<String>) -> Self {
        Self {
            shell,
            login: Credentials::new(config.user.clone(), config.password.clone()),
            sidadm_password: config.sidadm_password.clone(),
            instance_number: instance_number.into(),
        }
    }

    pub fn instance_number(&self) -> &str {
        &self.instance_number
    }

    /// Run `commands` in one session, stopping at the first transport error.
    /// The session is closed on every path.
    async fn exec(&self, host: &str, login: &Credentials, commands: &[String]) -> Result<Vec<CommandOutput>> {
        let session = self.shell.connect(host, login).await?;

        let mut outputs = Vec::with_capacity(commands.len());
        let mut failure = None;
        for command in commands {
            debug!("[{}@{}] {}", login.user, host, command);
            match session.run(command).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Err(e) = session.close().await {
            warn!("Failed to close session on {}: {}", host, e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    async fn run(&self, host: &str, command: String) -> Result<CommandOutput> {
        let output = self
            .exec(host, &self.login, std::slice::from_ref(&command))
            .await?
            .pop()
            .ok_or_else(|| Error::remote(host, "no output returned"))?;
        Ok(output)
    }

    async fn run_checked(&self, host: &str, command: String) -> Result<CommandOutput> {
        let output = self.run(host, command.clone()).await?;
        check_exit(host, &command, output)
    }

    /// Block device mounted at `mount_point`
    pub async fn mounted_device(&self, host: &str, mount_point: &str) -> Result<String> {
        let output = self.run_checked(host, "df -P".to_string()).await?;
        parse::mounted_device(&output.stdout, mount_point).ok_or_else(|| Error::VolumeNotMounted {
            host: host.to_string(),
            mount_point: mount_point.to_string(),
        })
    }

    /// OS-visible serial of the device mounted at `mount_point`
    pub async fn volume_serial(&self, host: &str, mount_point: &str) -> Result<Serial> {
        let device = self.mounted_device(host, mount_point).await?;
        let output = self
            .run_checked(host, format!("udevadm info --query=property --name={}", device))
            .await?;

        let serial = parse::udev_property(&output.stdout, "DM_SERIAL")
            .or_else(|| parse::udev_property(&output.stdout, "ID_SERIAL"))
            .ok_or_else(|| Error::SerialLookup {
                host: host.to_string(),
                device: device.clone(),
            })?;

        debug!("{}:{} is {} with serial {}", host, mount_point, device, serial);
        Ok(Serial::new(serial))
    }

    pub async fn freeze(&self, host: &str, mount_point: &str) -> Result<()> {
        info!("Freezing filesystem {} on {}", mount_point, host);
        self.run_checked(host, format!("sudo {} --freeze {}", FSFREEZE, mount_point))
            .await?;
        Ok(())
    }

    pub async fn unfreeze(&self, host: &str, mount_point: &str) -> Result<()> {
        info!("Unfreezing filesystem {} on {}", mount_point, host);
        self.run_checked(host, format!("sudo {} --unfreeze {}", FSFREEZE, mount_point))
            .await?;
        Ok(())
    }

    pub async fn stop_instance(&self, host: &str) -> Result<()> {
        info!("Stopping HANA instance {} on {}", self.instance_number, host);
        self.run_checked(
            host,
            format!("{} -nr {} -function Stop", SAPCONTROL, self.instance_number),
        )
        .await?;
        Ok(())
    }

    /// Daemon status. `sapcontrol` encodes the overall process color in
    /// its exit code, so a non-zero exit is not a failure here.
    pub async fn instance_status(&self, host: &str) -> Result<InstanceStatus> {
        let command = format!("{} -nr {} -function GetProcessList", SAPCONTROL, self.instance_number);
        let output = self.run(host, command.clone()).await?;
        parse::daemon_status(&output.stdout).ok_or_else(|| {
            Error::remote(
                host,
                format!("'{}' did not report the hdbdaemon process: {}", command, output.stderr.join(" ")),
            )
        })
    }

    pub async fn unmount(&self, host: &str, mount_point: &str) -> Result<()> {
        info!("Unmounting {} on {}", mount_point, host);
        self.run_checked(host, format!("sudo umount {}", mount_point)).await?;
        Ok(())
    }

    pub async fn mount(&self, host: &str, device: &str, mount_point: &str) -> Result<()> {
        info!("Mounting {} at {} on {}", device, mount_point, host);
        self.run_checked(host, format!("sudo mount {} {}", device, mount_point))
            .await?;
        Ok(())
    }

    pub async fn rescan_scsi(&self, host: &str, rescan: Rescan) -> Result<()> {
        info!("Rescanning SCSI bus on {} ({:?})", host, rescan);
        self.run_checked(host, format!("sudo rescan-scsi-bus.sh {}", rescan.flag()))
            .await?;
        Ok(())
    }

    /// Recover the system database from the data snapshot, as `<sid>adm`
    pub async fn recover_system_database(&self, host: &str, sid: &str) -> Result<()> {
        let password = self.sidadm_password.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "the {}adm password is required to recover the system database",
                sid.to_lowercase()
            ))
        })?;
        let login = Credentials::new(format!("{}adm", sid.to_lowercase()), password);
        let base = format!("/usr/sap/{}/HDB{}", sid, self.instance_number);
        let command = format!(
            "{base}/HDBSettings.sh {base}/exe/python_support/recoverSys.py \
             --command=\"RECOVER DATA USING SNAPSHOT CLEAR LOG\""
        );

        info!("Recovering system database of {} on {} as {}", sid, host, login.user);
        let output = self
            .exec(host, &login, std::slice::from_ref(&command))
            .await?
            .pop()
            .ok_or_else(|| Error::remote(host, "no output returned"))?;
        check_exit(host, &command, output)?;
        Ok(())
    }
}

fn check_exit(host: &str, command: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(Error::remote(
        host,
        format!(
            "'{}' exited with status {}: {}",
            command,
            output.exit_code.unwrap_or_default(),
            output.stderr.join(" ")
        ),
    ))
}
