//! In-memory fakes of every port, used by the unit tests.
//!
//! Each fake records the calls it receives so tests can assert on protocol
//! ordering, not just on results.

use crate::domain::model::{CatalogEntry, Serial};
use crate::domain::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

// =============================================================================
// Database
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeDatabase {
    responses: Mutex<Vec<(String, Vec<Row>)>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<(String, Route)>>,
}

impl FakeDatabase {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every statement containing `pattern` with `rows`; later
    /// patterns take precedence
    pub(crate) fn respond(&self, pattern: &str, rows: Vec<Vec<&str>>) {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| Some(c.to_string())).collect())
            .collect();
        self.responses.lock().push((pattern.to_string(), rows));
    }

    pub(crate) fn fail_on(&self, pattern: &str) {
        self.failures.lock().push(pattern.to_string());
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub(crate) fn executed_matching(&self, pattern: &str) -> Vec<(String, Route)> {
        self.log
            .lock()
            .iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DatabaseControl for FakeDatabase {
    async fn execute(&self, command: &str, route: &Route) -> Result<Vec<Row>> {
        self.log.lock().push((command.to_string(), route.clone()));
        if self.failures.lock().iter().any(|p| command.contains(p.as_str())) {
            return Err(Error::control(command, "scripted failure"));
        }
        let responses = self.responses.lock();
        Ok(responses
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

// =============================================================================
// Shell
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShellCall {
    pub host: String,
    pub user: String,
    pub command: String,
}

#[derive(Default)]
struct ShellState {
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<ShellCall>>,
    opened: Mutex<usize>,
    closed: Mutex<usize>,
}

#[derive(Default, Clone)]
pub(crate) struct FakeShell {
    state: Arc<ShellState>,
}

impl FakeShell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, pattern: &str, stdout: &str) {
        self.respond_seq(pattern, vec![CommandOutput::from_text(stdout, "", Some(0))]);
    }

    /// Successive answers; the last one repeats. Later patterns take
    /// precedence.
    pub(crate) fn respond_seq(&self, pattern: &str, outputs: Vec<CommandOutput>) {
        self.state
            .responses
            .lock()
            .push((pattern.to_string(), outputs.into_iter().collect()));
    }

    pub(crate) fn fail_on(&self, pattern: &str) {
        self.state.failures.lock().push(pattern.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<ShellCall> {
        self.state.log.lock().clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub(crate) fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    pub(crate) fn sessions(&self) -> (usize, usize) {
        (*self.state.opened.lock(), *self.state.closed.lock())
    }
}

struct FakeSession {
    host: String,
    user: String,
    state: Arc<ShellState>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.state.log.lock().push(ShellCall {
            host: self.host.clone(),
            user: self.user.clone(),
            command: command.to_string(),
        });
        if self.state.failures.lock().iter().any(|p| command.contains(p.as_str())) {
            return Err(Error::remote(&self.host, format!("scripted failure: {}", command)));
        }
        let mut responses = self.state.responses.lock();
        let found = responses
            .iter_mut()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()));
        Ok(match found {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some((_, queue)) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::from_text("", "", Some(0)),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        *self.state.closed.lock() += 1;
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for FakeShell {
    async fn connect(&self, host: &str, login: &Credentials) -> Result<Box<dyn RemoteSession>> {
        *self.state.opened.lock() += 1;
        Ok(Box::new(FakeSession {
            host: host.to_string(),
            user: login.user.clone(),
            state: self.state.clone(),
        }))
    }
}

/// `df -P` listing with one mounted device
pub(crate) fn df_listing(device: &str, mount_point: &str) -> String {
    format!(
        "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
         /dev/sda2 41922560 9834012 32088548 24% /\n\
         {} 536608768 182345128 354263640 34% {}\n",
        device, mount_point
    )
}

/// `udevadm info --query=property` output for a multipath device
pub(crate) fn udev_properties(serial: &str) -> String {
    format!(
        "DEVNAME=/dev/dm-3\nDM_NAME={serial}\nDM_UUID=mpath-{serial}\nDM_SERIAL={serial}\nSUBSYSTEM=block\n"
    )
}

/// `sapcontrol -function GetProcessList` output with the daemon in `status`
pub(crate) fn process_list(color: &str, status: &str) -> CommandOutput {
    let text = format!(
        "\n19.10.2026 10:15:02\nGetProcessList\nOK\n\
         name, description, dispstatus, textstatus, starttime, elapsedtime, pid\n\
         hdbdaemon, HDB Daemon, {color}, {status}, 2026 10 19 09:00:01, 1:15:01, 4711\n\
         hdbcompileserver, HDB Compileserver, {color}, {status}, 2026 10 19 09:00:05, 1:14:57, 4790\n"
    );
    CommandOutput::from_text(&text, "", Some(0))
}

// =============================================================================
// Array
// =============================================================================

#[derive(Default)]
struct ArrayState {
    volumes: Vec<ArrayVolume>,
    snapshots: Vec<VolumeSnapshot>,
    pgroups: BTreeMap<String, BTreeSet<String>>,
    pgroup_snapshots: usize,
    hosts: Vec<String>,
    connections: Vec<HostConnection>,
    tags: Vec<VolumeTag>,
    failing: HashSet<String>,
    racing_pgroup_create: bool,
    serial_counter: u64,
}

#[derive(Default)]
pub(crate) struct FakeArray {
    state: Mutex<ArrayState>,
    log: Mutex<Vec<String>>,
}

impl FakeArray {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_volume(&self, name: &str, serial: &str) {
        self.state.lock().volumes.push(ArrayVolume {
            name: name.to_string(),
            serial: serial.to_uppercase(),
            size: Some(512 * 1024 * 1024 * 1024),
            source: None,
            created: None,
        });
    }

    pub(crate) fn add_snapshot(&self, volume: &str, suffix: &str) {
        self.state.lock().snapshots.push(VolumeSnapshot {
            name: format!("{}.{}", volume, suffix),
            serial: "SNAPSERIAL0001".to_string(),
            source: volume.to_string(),
            created: None,
        });
    }

    pub(crate) fn connect(&self, host: &str, volume: &str) {
        let mut state = self.state.lock();
        if !state.hosts.iter().any(|h| h == host) {
            state.hosts.push(host.to_string());
        }
        state.connections.push(HostConnection {
            name: host.to_string(),
            vol: volume.to_string(),
            lun: Some(1),
        });
    }

    pub(crate) fn add_tag(&self, volume: &str, key: &str, value: &str) {
        self.state.lock().tags.push(VolumeTag {
            name: volume.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            namespace: Some("vasa-integration.purestorage.com".to_string()),
        });
    }

    pub(crate) fn fail(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    /// `get_pgroup` misses but `create_pgroup` finds that someone else won
    pub(crate) fn race_pgroup_create(&self) {
        self.state.lock().racing_pgroup_create = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub(crate) fn pgroup_members(&self, name: &str) -> Option<BTreeSet<String>> {
        self.state.lock().pgroups.get(name).cloned()
    }

    pub(crate) fn pgroup_count(&self) -> usize {
        self.state.lock().pgroups.len()
    }

    pub(crate) fn connections(&self) -> Vec<HostConnection> {
        self.state.lock().connections.clone()
    }

    fn record(&self, operation: &str, detail: String) -> Result<()> {
        self.log.lock().push(format!("{}:{}", operation, detail));
        if self.state.lock().failing.contains(operation) {
            return Err(Error::storage(operation, "scripted array failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArrayClient for FakeArray {
    async fn list_volumes(&self) -> Result<Vec<ArrayVolume>> {
        self.record("list_volumes", String::new())?;
        Ok(self.state.lock().volumes.clone())
    }

    async fn get_volume(&self, name: &str) -> Result<ArrayVolume> {
        self.record("get_volume", name.to_string())?;
        self.state
            .lock()
            .volumes
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Volume".into(),
                name: name.into(),
            })
    }

    async fn list_volume_snapshots(&self, name: &str) -> Result<Vec<VolumeSnapshot>> {
        self.record("list_volume_snapshots", name.to_string())?;
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.source == name)
            .cloned()
            .collect())
    }

    async fn create_snapshot(&self, volume: &str, suffix: &str) -> Result<VolumeSnapshot> {
        self.record("create_snapshot", format!("{}:{}", volume, suffix))?;
        let mut state = self.state.lock();
        state.serial_counter += 1;
        let snapshot = VolumeSnapshot {
            name: format!("{}.{}", volume, suffix),
            serial: format!("SNAP{:020}", state.serial_counter),
            source: volume.to_string(),
            created: None,
        };
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn copy_volume(&self, source: &str, destination: &str, overwrite: bool) -> Result<ArrayVolume> {
        self.record("copy_volume", format!("{}:{}:{}", source, destination, overwrite))?;
        let mut state = self.state.lock();
        if let Some(existing) = state.volumes.iter().find(|v| v.name == destination) {
            if !overwrite {
                return Err(Error::ResourceExists {
                    kind: "Volume".into(),
                    name: destination.into(),
                });
            }
            return Ok(existing.clone());
        }
        state.serial_counter += 1;
        let volume = ArrayVolume {
            name: destination.to_string(),
            serial: format!("C0FFEE{:018}", state.serial_counter),
            size: None,
            source: Some(source.to_string()),
            created: None,
        };
        state.volumes.push(volume.clone());
        Ok(volume)
    }

    async fn get_pgroup(&self, name: &str) -> Result<Option<ProtectionGroupInfo>> {
        self.record("get_pgroup", name.to_string())?;
        let state = self.state.lock();
        if state.racing_pgroup_create {
            return Ok(None);
        }
        Ok(state.pgroups.get(name).map(|members| ProtectionGroupInfo {
            name: name.to_string(),
            volumes: members.iter().cloned().collect(),
        }))
    }

    async fn create_pgroup(&self, name: &str) -> Result<ProtectionGroupInfo> {
        self.record("create_pgroup", name.to_string())?;
        let mut state = self.state.lock();
        if state.racing_pgroup_create {
            state.pgroups.entry(name.to_string()).or_default();
        }
        if state.pgroups.contains_key(name) {
            return Err(Error::ResourceExists {
                kind: "ProtectionGroup".into(),
                name: name.into(),
            });
        }
        state.pgroups.insert(name.to_string(), BTreeSet::new());
        Ok(ProtectionGroupInfo {
            name: name.to_string(),
            volumes: Vec::new(),
        })
    }

    async fn add_volume_to_pgroup(&self, volume: &str, pgroup: &str) -> Result<()> {
        self.record("add_volume_to_pgroup", format!("{}:{}", volume, pgroup))?;
        let mut state = self.state.lock();
        let members = state.pgroups.get_mut(pgroup).ok_or_else(|| Error::ResourceNotFound {
            kind: "ProtectionGroup".into(),
            name: pgroup.into(),
        })?;
        members.insert(volume.to_string());
        Ok(())
    }

    async fn create_pgroup_snapshot(&self, pgroup: &str) -> Result<PgroupSnapshot> {
        self.record("create_pgroup_snapshot", pgroup.to_string())?;
        let mut state = self.state.lock();
        state.pgroup_snapshots += 1;
        Ok(PgroupSnapshot {
            name: format!("{}.{}", pgroup, state.pgroup_snapshots),
            source: Some(pgroup.to_string()),
            created: None,
        })
    }

    async fn list_hosts(&self) -> Result<Vec<ArrayHost>> {
        self.record("list_hosts", String::new())?;
        Ok(self
            .state
            .lock()
            .hosts
            .iter()
            .map(|name| ArrayHost { name: name.clone() })
            .collect())
    }

    async fn list_host_connections(&self, host: &str) -> Result<Vec<HostConnection>> {
        self.record("list_host_connections", host.to_string())?;
        Ok(self
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| c.name == host)
            .cloned()
            .collect())
    }

    async fn connect_host(&self, host: &str, volume: &str) -> Result<HostConnection> {
        self.record("connect_host", format!("{}:{}", host, volume))?;
        let connection = HostConnection {
            name: host.to_string(),
            vol: volume.to_string(),
            lun: Some(2),
        };
        self.state.lock().connections.push(connection.clone());
        Ok(connection)
    }

    async fn disconnect_host(&self, host: &str, volume: &str) -> Result<()> {
        self.record("disconnect_host", format!("{}:{}", host, volume))?;
        self.state
            .lock()
            .connections
            .retain(|c| !(c.name == host && c.vol == volume));
        Ok(())
    }

    async fn list_virtual_volume(&self, backing_object_id: &str) -> Result<Vec<VolumeTag>> {
        self.record("list_virtual_volume", backing_object_id.to_string())?;
        let state = self.state.lock();
        let volumes: BTreeSet<String> = state
            .tags
            .iter()
            .filter(|t| t.value == backing_object_id)
            .map(|t| t.name.clone())
            .collect();
        Ok(state
            .tags
            .iter()
            .filter(|t| volumes.contains(&t.name))
            .cloned()
            .collect())
    }
}

// =============================================================================
// vCenter
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeVCenter {
    backings: Mutex<BTreeMap<String, VvolBacking>>,
    lookups: Mutex<usize>,
}

impl FakeVCenter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_backing(&self, serial: &str, backing_object_id: &str) {
        self.backings.lock().insert(
            serial.to_lowercase(),
            VvolBacking {
                uuid: serial.trim_start_matches('3').to_string(),
                backing_object_id: backing_object_id.to_string(),
            },
        );
    }

    pub(crate) fn lookups(&self) -> usize {
        *self.lookups.lock()
    }
}

#[async_trait]
impl VCenterLookup for FakeVCenter {
    async fn resolve_vvol_backing(
        &self,
        serial: &Serial,
        _credentials: &VCenterCredentials,
    ) -> Result<Option<VvolBacking>> {
        *self.lookups.lock() += 1;
        Ok(self.backings.lock().get(serial.as_str()).cloned())
    }
}

// =============================================================================
// Operator
// =============================================================================

#[derive(Default)]
pub(crate) struct ScriptedPrompt {
    selections: Mutex<VecDeque<Option<usize>>>,
    confirmations: Mutex<VecDeque<bool>>,
    presented: Mutex<Vec<Vec<CatalogEntry>>>,
    notices: Mutex<Vec<RestoreNotice>>,
    messages: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub(crate) fn new(selections: Vec<Option<usize>>, confirmations: Vec<bool>) -> Arc<Self> {
        Arc::new(Self {
            selections: Mutex::new(selections.into()),
            confirmations: Mutex::new(confirmations.into()),
            ..Default::default()
        })
    }

    pub(crate) fn presented(&self) -> Vec<Vec<CatalogEntry>> {
        self.presented.lock().clone()
    }

    pub(crate) fn notices(&self) -> Vec<RestoreNotice> {
        self.notices.lock().clone()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedPrompt {
    async fn select_backup(&self, entries: &[CatalogEntry]) -> Result<Option<usize>> {
        self.presented.lock().push(entries.to_vec());
        Ok(self.selections.lock().pop_front().flatten())
    }

    async fn confirm_restore(&self, notice: &RestoreNotice) -> Result<bool> {
        self.notices.lock().push(notice.clone());
        Ok(self.confirmations.lock().pop_front().unwrap_or(false))
    }

    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().push(message.to_string());
        Ok(())
    }
}
