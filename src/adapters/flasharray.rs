//! FlashArray REST client
//!
//! Talks to the Purity REST 1.x API. A session is opened at construction
//! time: the user name and password are exchanged for an API token, which
//! in turn opens a cookie session used by every later request.
//!
//! Array errors come back as a JSON list of `{"msg": ...}` objects. Messages
//! saying a resource "already exists" or "does not exist" are mapped to
//! [`Error::ResourceExists`] and [`Error::ResourceNotFound`]; everything else
//! is an [`Error::StorageOperation`].

use crate::domain::ports::{
    ArrayClient, ArrayHost, ArrayVolume, HostConnection, PgroupSnapshot, ProtectionGroupInfo, VolumeSnapshot,
    VolumeTag,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// FlashArray connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashArrayConfig {
    /// Management address (host name or IP)
    pub endpoint: String,
    pub user: String,
    #[serde(skip)]
    pub password: String,
    /// REST API version
    pub api_version: String,
    /// Verify the array certificate; arrays usually ship self-signed ones
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for FlashArrayConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            user: "pureuser".to_string(),
            password: String::new(),
            api_version: "1.19".to_string(),
            verify_tls: false,
            timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for FlashArrayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashArrayConfig")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FlashArrayConfig {
    fn base_url(&self) -> String {
        format!("https://{}/api/{}", self.endpoint.trim_end_matches('/'), self.api_version)
    }
}

// =============================================================================
// Error bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct ArrayMessage {
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ApiToken {
    api_token: String,
}

/// What a failed request was about, for error classification
struct Subject<'a> {
    operation: &'a str,
    kind: &'a str,
    name: &'a str,
}

fn classify(status: StatusCode, body: &str, subject: &Subject<'_>) -> Error {
    let message = match serde_json::from_str::<Vec<ArrayMessage>>(body) {
        Ok(messages) if !messages.is_empty() => messages
            .into_iter()
            .map(|m| m.msg)
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    };
    let lowered = message.to_lowercase();

    if lowered.contains("already exists") {
        Error::ResourceExists {
            kind: subject.kind.to_string(),
            name: subject.name.to_string(),
        }
    } else if lowered.contains("does not exist") || status == StatusCode::NOT_FOUND {
        Error::ResourceNotFound {
            kind: subject.kind.to_string(),
            name: subject.name.to_string(),
        }
    } else {
        Error::storage(subject.operation, format!("{} ({})", message, status))
    }
}

// =============================================================================
// Client
// =============================================================================

/// [`ArrayClient`] over the FlashArray REST API
pub struct FlashArrayClient {
    http: Client,
    base_url: String,
}

impl FlashArrayClient {
    /// Build the HTTP client and open a session
    pub async fn connect(config: &FlashArrayConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(Error::Configuration("FlashArray endpoint is not set".into()));
        }

        let http = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let client = Self {
            http,
            base_url: config.base_url(),
        };

        let token: ApiToken = client
            .call(
                Method::POST,
                "auth/apitoken",
                Some(json!({ "username": config.user, "password": config.password })),
                &Subject {
                    operation: "login",
                    kind: "user",
                    name: &config.user,
                },
            )
            .await?;
        let _: Value = client
            .call(
                Method::POST,
                "auth/session",
                Some(json!({ "api_token": token.api_token })),
                &Subject {
                    operation: "login",
                    kind: "session",
                    name: &config.user,
                },
            )
            .await?;

        info!("FlashArray session open on {} as {}", config.endpoint, config.user);
        Ok(client)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        subject: &Subject<'_>,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("FlashArray {} {}", method, url);

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, &text, subject));
        }

        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn first<T>(mut items: Vec<T>, operation: &str, name: &str) -> Result<T> {
    if items.is_empty() {
        return Err(Error::storage(operation, format!("array returned nothing for {}", name)));
    }
    Ok(items.swap_remove(0))
}

#[async_trait]
impl ArrayClient for FlashArrayClient {
    async fn list_volumes(&self) -> Result<Vec<ArrayVolume>> {
        self.call(
            Method::GET,
            "volume",
            None,
            &Subject {
                operation: "list_volumes",
                kind: "volume",
                name: "*",
            },
        )
        .await
    }

    async fn get_volume(&self, name: &str) -> Result<ArrayVolume> {
        self.call(
            Method::GET,
            &format!("volume/{}", segment(name)),
            None,
            &Subject {
                operation: "get_volume",
                kind: "volume",
                name,
            },
        )
        .await
    }

    async fn list_volume_snapshots(&self, name: &str) -> Result<Vec<VolumeSnapshot>> {
        self.call(
            Method::GET,
            &format!("volume/{}?snap=true", segment(name)),
            None,
            &Subject {
                operation: "list_volume_snapshots",
                kind: "volume",
                name,
            },
        )
        .await
    }

    async fn create_snapshot(&self, volume: &str, suffix: &str) -> Result<VolumeSnapshot> {
        let snapshots: Vec<VolumeSnapshot> = self
            .call(
                Method::POST,
                "volume",
                Some(json!({ "snap": true, "source": [volume], "suffix": suffix })),
                &Subject {
                    operation: "create_snapshot",
                    kind: "snapshot",
                    name: &format!("{}.{}", volume, suffix),
                },
            )
            .await?;
        first(snapshots, "create_snapshot", volume)
    }

    async fn copy_volume(&self, source: &str, destination: &str, overwrite: bool) -> Result<ArrayVolume> {
        self.call(
            Method::POST,
            &format!("volume/{}", segment(destination)),
            Some(json!({ "source": source, "overwrite": overwrite })),
            &Subject {
                operation: "copy_volume",
                kind: "volume",
                name: destination,
            },
        )
        .await
    }

    async fn get_pgroup(&self, name: &str) -> Result<Option<ProtectionGroupInfo>> {
        let found = self
            .call(
                Method::GET,
                &format!("pgroup/{}", segment(name)),
                None,
                &Subject {
                    operation: "get_pgroup",
                    kind: "pgroup",
                    name,
                },
            )
            .await;
        match found {
            Ok(group) => Ok(Some(group)),
            Err(Error::ResourceNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_pgroup(&self, name: &str) -> Result<ProtectionGroupInfo> {
        self.call(
            Method::POST,
            &format!("pgroup/{}", segment(name)),
            None,
            &Subject {
                operation: "create_pgroup",
                kind: "pgroup",
                name,
            },
        )
        .await
    }

    async fn add_volume_to_pgroup(&self, volume: &str, pgroup: &str) -> Result<()> {
        let added: Result<Value> = self
            .call(
                Method::POST,
                &format!("volume/{}/pgroup/{}", segment(volume), segment(pgroup)),
                None,
                &Subject {
                    operation: "add_volume_to_pgroup",
                    kind: "pgroup member",
                    name: volume,
                },
            )
            .await;
        match added {
            Ok(_) | Err(Error::ResourceExists { .. }) => Ok(()),
            Err(Error::StorageOperation { reason, .. }) if reason.to_lowercase().contains("already") => {
                debug!("{} is already a member of {}", volume, pgroup);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_pgroup_snapshot(&self, pgroup: &str) -> Result<PgroupSnapshot> {
        let snapshots: Vec<PgroupSnapshot> = self
            .call(
                Method::POST,
                "pgroup",
                Some(json!({ "snap": true, "source": [pgroup] })),
                &Subject {
                    operation: "create_pgroup_snapshot",
                    kind: "pgroup",
                    name: pgroup,
                },
            )
            .await?;
        first(snapshots, "create_pgroup_snapshot", pgroup)
    }

    async fn list_hosts(&self) -> Result<Vec<ArrayHost>> {
        self.call(
            Method::GET,
            "host",
            None,
            &Subject {
                operation: "list_hosts",
                kind: "host",
                name: "*",
            },
        )
        .await
    }

    async fn list_host_connections(&self, host: &str) -> Result<Vec<HostConnection>> {
        self.call(
            Method::GET,
            &format!("host/{}/volume", segment(host)),
            None,
            &Subject {
                operation: "list_host_connections",
                kind: "host",
                name: host,
            },
        )
        .await
    }

    async fn connect_host(&self, host: &str, volume: &str) -> Result<HostConnection> {
        self.call(
            Method::POST,
            &format!("host/{}/volume/{}", segment(host), segment(volume)),
            None,
            &Subject {
                operation: "connect_host",
                kind: "host connection",
                name: &format!("{}/{}", host, volume),
            },
        )
        .await
    }

    async fn disconnect_host(&self, host: &str, volume: &str) -> Result<()> {
        let _: Value = self
            .call(
                Method::DELETE,
                &format!("host/{}/volume/{}", segment(host), segment(volume)),
                None,
                &Subject {
                    operation: "disconnect_host",
                    kind: "host connection",
                    name: &format!("{}/{}", host, volume),
                },
            )
            .await?;
        Ok(())
    }

    async fn list_virtual_volume(&self, backing_object_id: &str) -> Result<Vec<VolumeTag>> {
        let filter = format!("value='{}'", backing_object_id);
        let tags: Vec<VolumeTag> = self
            .call(
                Method::GET,
                &format!("volume?tags=true&filter={}", segment(&filter)),
                None,
                &Subject {
                    operation: "list_virtual_volume",
                    kind: "vvol",
                    name: backing_object_id,
                },
            )
            .await?;
        Ok(tags.into_iter().filter(|t| t.value == backing_object_id).collect())
    }
}
