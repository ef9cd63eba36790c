//! hdbsql control commands
//!
//! Runs each statement through the SAP `hdbsql` command line client and
//! parses its CSV output. The port is derived from the instance number and
//! the route: `3<nr>13` for the system database, `3<nr>15` for a tenant or
//! single container.

use crate::domain::ports::{DatabaseControl, Route, Routing, Row};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// hdbsql client settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdbsqlConfig {
    /// Path of the hdbsql binary
    pub binary: String,
    /// Taken from the HANA instance settings
    #[serde(skip)]
    pub instance_number: String,
    pub user: String,
    /// `hdbuserstore` key to log on with. When set, `-U <key>` replaces
    /// host, user and password on the command line, so the key must point
    /// at the SQL port of the system database (or of the single container).
    pub user_store_key: Option<String>,
    /// Only used without a user store key. It is passed with `-p` and is
    /// visible to other local users in the process list.
    #[serde(skip)]
    pub password: String,
    /// Port suffix of the system database
    pub system_db_port_suffix: String,
    /// Port suffix of a tenant or single container
    pub tenant_port_suffix: String,
    pub timeout_secs: u64,
}

impl Default for HdbsqlConfig {
    fn default() -> Self {
        Self {
            binary: "hdbsql".to_string(),
            instance_number: "00".to_string(),
            user: "SYSTEM".to_string(),
            user_store_key: None,
            password: String::new(),
            system_db_port_suffix: "13".to_string(),
            tenant_port_suffix: "15".to_string(),
            timeout_secs: 300,
        }
    }
}

impl std::fmt::Debug for HdbsqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdbsqlConfig")
            .field("binary", &self.binary)
            .field("instance_number", &self.instance_number)
            .field("user", &self.user)
            .field("user_store_key", &self.user_store_key)
            .field("password", &"<redacted>")
            .field("system_db_port_suffix", &self.system_db_port_suffix)
            .field("tenant_port_suffix", &self.tenant_port_suffix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HdbsqlConfig {
    /// SQL port for a route
    pub fn port(&self, routing: Routing) -> String {
        let suffix = match routing {
            Routing::SystemDatabase => &self.system_db_port_suffix,
            Routing::Tenant => &self.tenant_port_suffix,
        };
        format!("3{}{}", self.instance_number, suffix)
    }

    /// Arguments of one hdbsql invocation
    fn arguments(&self, node: &str, command: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(9);
        match &self.user_store_key {
            Some(key) => args.extend(["-U".to_string(), key.clone()]),
            None => args.extend([
                "-n".to_string(),
                node.to_string(),
                "-u".to_string(),
                self.user.clone(),
                "-p".to_string(),
                self.password.clone(),
            ]),
        }
        args.extend(["-j", "-a", "-x"].map(String::from));
        args.push(command.to_string());
        args
    }
}

/// [`DatabaseControl`] through the `hdbsql` binary
pub struct HdbsqlClient {
    config: HdbsqlConfig,
}

impl HdbsqlClient {
    pub fn new(config: HdbsqlConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DatabaseControl for HdbsqlClient {
    async fn execute(&self, command: &str, route: &Route) -> Result<Vec<Row>> {
        let node = format!("{}:{}", route.host, self.config.port(route.routing));
        debug!("hdbsql on {}: {}", node, command);

        let mut child = Command::new(&self.config.binary);
        child
            .args(self.config.arguments(&node, command))
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), child.output())
            .await
            .map_err(|_| Error::control(command, format!("no answer from {} after {}s", node, self.config.timeout_secs)))?
            .map_err(|e| Error::control(command, format!("cannot run {}: {}", self.config.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let reason = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(Error::control(command, reason.trim()));
        }

        Ok(parse_rows(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse hdbsql output: one row per line, comma separated, strings in
/// double quotes with `""` escapes, `?` for NULL
pub fn parse_rows(output: &str) -> Vec<Row> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Row {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if !quoted && field.trim().is_empty() => {
                field.clear();
                quoted = true;
                in_quotes = true;
            }
            ',' => {
                fields.push(finish_field(&field, quoted));
                field.clear();
                quoted = false;
            }
            _ if quoted => {}
            _ => field.push(c),
        }
    }
    fields.push(finish_field(&field, quoted));
    fields
}

fn finish_field(field: &str, quoted: bool) -> Option<String> {
    if quoted {
        return Some(field.to_string());
    }
    match field.trim() {
        "?" => None,
        value => Some(value.to_string()),
    }
}
