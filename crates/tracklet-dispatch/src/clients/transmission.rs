//! Transmission RPC client.
//!
//! The RPC endpoint answers 409 with an `X-Transmission-Session-Id`
//! challenge; the client caches the token and retries once per request when
//! the daemon rotates it.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;
use tracklet_core::{
    AddTorrentRequest, DownloaderClient, DownloaderError, DownloaderResult, DownloaderSetting,
    RemoteTask, TaskProgress,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// Transmission RPC client.
pub struct TransmissionClient {
    name: String,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    client: Client,
    session_id: Mutex<Option<String>>,
}

impl TransmissionClient {
    /// Build a client for one daemon. The configured URL may point at the
    /// host root or directly at `/transmission/rpc`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(setting: &DownloaderSetting) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| DownloaderError::Unreachable {
                name: setting.name.clone(),
                message: error.to_string(),
            })?;
        let trimmed = setting.url.trim_end_matches('/');
        let endpoint = if trimmed.ends_with("/rpc") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/transmission/rpc")
        };
        Ok(Self {
            name: setting.name.clone(),
            endpoint,
            username: setting.username.clone(),
            password: setting.password.clone(),
            client,
            session_id: Mutex::new(None),
        })
    }

    async fn rpc(&self, method: &str, arguments: Value) -> DownloaderResult<Value> {
        let body = json!({ "method": method, "arguments": arguments });

        for attempt in 0..2 {
            let mut request = self.client.post(self.endpoint.as_str()).json(&body);
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_deref());
            }
            if let Some(session_id) = self.session_id.lock().await.clone() {
                request = request.header(SESSION_HEADER, session_id);
            }

            let response =
                request
                    .send()
                    .await
                    .map_err(|error| DownloaderError::Unreachable {
                        name: self.name.clone(),
                        message: error.to_string(),
                    })?;

            match response.status().as_u16() {
                409 if attempt == 0 => {
                    let challenge = response
                        .headers()
                        .get(SESSION_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    debug!(downloader = %self.name, "transmission session id rotated");
                    *self.session_id.lock().await = challenge;
                    continue;
                }
                401 | 403 => {
                    return Err(DownloaderError::AuthFailed {
                        name: self.name.clone(),
                    });
                }
                status if status >= 400 => {
                    return Err(DownloaderError::Protocol {
                        name: self.name.clone(),
                        message: format!("rpc answered status {status}"),
                    });
                }
                _ => {}
            }

            let payload: Value =
                response
                    .json()
                    .await
                    .map_err(|error| DownloaderError::Protocol {
                        name: self.name.clone(),
                        message: format!("rpc decode failed: {error}"),
                    })?;
            let result = payload
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("missing result");
            if result != "success" {
                return Err(DownloaderError::Rejected {
                    name: self.name.clone(),
                    reason: result.to_string(),
                });
            }
            return Ok(payload
                .get("arguments")
                .cloned()
                .unwrap_or(Value::Null));
        }

        Err(DownloaderError::Protocol {
            name: self.name.clone(),
            message: "session challenge loop did not converge".to_string(),
        })
    }

    async fn torrent_entry(&self, hash: &str) -> DownloaderResult<Option<Value>> {
        let arguments = self
            .rpc(
                "torrent-get",
                json!({
                    "ids": [hash],
                    "fields": ["id", "hashString", "name", "percentDone", "status", "isFinished"],
                }),
            )
            .await?;
        let torrents = arguments
            .get("torrents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(torrents.into_iter().next())
    }
}

fn task_from_entry(entry: &Value, fallback_hash: &str) -> RemoteTask {
    let task_id = entry
        .get("id")
        .and_then(Value::as_i64)
        .map_or_else(|| fallback_hash.to_string(), |id| id.to_string());
    RemoteTask {
        task_id,
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[async_trait]
impl DownloaderClient for TransmissionClient {
    async fn ping(&self) -> DownloaderResult<()> {
        self.rpc("session-get", json!({ "fields": ["version"] }))
            .await?;
        Ok(())
    }

    async fn find_task(&self, hash: &str) -> DownloaderResult<Option<RemoteTask>> {
        Ok(self
            .torrent_entry(hash)
            .await?
            .map(|entry| task_from_entry(&entry, hash)))
    }

    async fn add_torrent(&self, request: &AddTorrentRequest) -> DownloaderResult<RemoteTask> {
        let mut arguments = json!({
            "metainfo": BASE64.encode(&request.bytes),
            "paused": request.paused,
        });
        if let Some(save_path) = &request.save_path {
            arguments["download-dir"] = Value::String(save_path.clone());
        }
        if !request.tags.is_empty() {
            arguments["labels"] = Value::Array(
                request
                    .tags
                    .iter()
                    .map(|tag| Value::String(tag.clone()))
                    .collect(),
            );
        }

        let response = self.rpc("torrent-add", arguments).await?;
        let entry = response
            .get("torrent-added")
            .or_else(|| response.get("torrent-duplicate"))
            .ok_or_else(|| DownloaderError::Protocol {
                name: self.name.clone(),
                message: "torrent-add answered without a torrent".to_string(),
            })?;
        Ok(task_from_entry(entry, &request.info_hash))
    }

    async fn progress(&self, hash: &str) -> DownloaderResult<TaskProgress> {
        let entry = self
            .torrent_entry(hash)
            .await?
            .ok_or_else(|| DownloaderError::TaskNotFound {
                name: self.name.clone(),
                hash: hash.to_string(),
            })?;
        let fraction = entry
            .get("percentDone")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let finished = entry
            .get("isFinished")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(TaskProgress {
            percent: fraction * 100.0,
            completed: finished || fraction >= 1.0,
            state: entry
                .get("status")
                .and_then(Value::as_i64)
                .map(|status| status.to_string()),
        })
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        self.rpc("torrent-stop", json!({ "ids": [hash] })).await?;
        Ok(())
    }

    async fn resume(&self, hash: &str) -> DownloaderResult<()> {
        self.rpc("torrent-start", json!({ "ids": [hash] })).await?;
        Ok(())
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> DownloaderResult<()> {
        self.rpc(
            "torrent-remove",
            json!({ "ids": [hash], "delete-local-data": delete_data }),
        )
        .await?;
        Ok(())
    }
}
