//! qBittorrent Web API v2 client.
//!
//! Sessions are cookie-based: `auth/login` sets the `SID` cookie inside the
//! client's store, and a 403 triggers one transparent re-login before the
//! request is retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracklet_core::{
    AddTorrentRequest, DownloaderClient, DownloaderError, DownloaderResult, DownloaderSetting,
    RemoteTask, TaskProgress,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// qBittorrent Web API v2 client.
pub struct QbitClient {
    name: String,
    base: String,
    username: String,
    password: String,
    client: Client,
    logged_in: Mutex<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TorrentInfo {
    hash: String,
    name: Option<String>,
    progress: f64,
    state: Option<String>,
}

impl QbitClient {
    /// Build a client for one daemon.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(setting: &DownloaderSetting) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()
            .map_err(|error| DownloaderError::Unreachable {
                name: setting.name.clone(),
                message: error.to_string(),
            })?;
        Ok(Self {
            name: setting.name.clone(),
            base: setting.url.trim_end_matches('/').to_string(),
            username: setting.username.clone().unwrap_or_default(),
            password: setting.password.clone().unwrap_or_default(),
            client,
            logged_in: Mutex::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base)
    }

    fn transport_error(&self, error: &reqwest::Error) -> DownloaderError {
        DownloaderError::Unreachable {
            name: self.name.clone(),
            message: error.to_string(),
        }
    }

    async fn login(&self) -> DownloaderResult<()> {
        let response = self
            .client
            .post(self.url("auth/login"))
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(DownloaderError::AuthFailed {
                name: self.name.clone(),
            });
        }
        *self.logged_in.lock().await = true;
        debug!(downloader = %self.name, "qbittorrent session established");
        Ok(())
    }

    async fn ensure_session(&self) -> DownloaderResult<()> {
        if *self.logged_in.lock().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send a request, re-authenticating once on a 403.
    async fn with_session<F>(&self, build: F) -> DownloaderResult<Response>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        self.ensure_session().await?;
        for attempt in 0..2 {
            let response = build(&self.client)
                .send()
                .await
                .map_err(|error| self.transport_error(&error))?;
            if response.status().as_u16() == 403 && attempt == 0 {
                *self.logged_in.lock().await = false;
                self.login().await?;
                continue;
            }
            if response.status().as_u16() == 403 {
                return Err(DownloaderError::AuthFailed {
                    name: self.name.clone(),
                });
            }
            if !response.status().is_success() {
                return Err(DownloaderError::Protocol {
                    name: self.name.clone(),
                    message: format!("unexpected status {}", response.status()),
                });
            }
            return Ok(response);
        }
        Err(DownloaderError::AuthFailed {
            name: self.name.clone(),
        })
    }

    async fn torrent_info(&self, hash: &str) -> DownloaderResult<Option<TorrentInfo>> {
        let url = self.url(&format!("torrents/info?hashes={hash}"));
        let response = self.with_session(|client| client.get(url.clone())).await?;
        let mut entries: Vec<TorrentInfo> =
            response
                .json()
                .await
                .map_err(|error| DownloaderError::Protocol {
                    name: self.name.clone(),
                    message: format!("torrents/info decode failed: {error}"),
                })?;
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entries.swap_remove(0))
        })
    }
}

fn state_is_complete(progress: f64, state: Option<&str>) -> bool {
    if progress >= 1.0 {
        return true;
    }
    matches!(
        state.unwrap_or(""),
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "checkingUP"
            | "forcedUP"
    )
}

#[async_trait]
impl DownloaderClient for QbitClient {
    async fn ping(&self) -> DownloaderResult<()> {
        let url = self.url("app/version");
        self.with_session(|client| client.get(url.clone())).await?;
        Ok(())
    }

    async fn find_task(&self, hash: &str) -> DownloaderResult<Option<RemoteTask>> {
        Ok(self.torrent_info(hash).await?.map(|info| RemoteTask {
            task_id: if info.hash.is_empty() {
                hash.to_string()
            } else {
                info.hash
            },
            name: info.name,
        }))
    }

    async fn add_torrent(&self, request: &AddTorrentRequest) -> DownloaderResult<RemoteTask> {
        self.ensure_session().await?;
        for attempt in 0..2 {
            let mut form = reqwest::multipart::Form::new().part(
                "torrents",
                reqwest::multipart::Part::bytes(request.bytes.clone())
                    .file_name(format!("{}.torrent", request.info_hash))
                    .mime_str("application/x-bittorrent")
                    .map_err(|error| DownloaderError::Protocol {
                        name: self.name.clone(),
                        message: error.to_string(),
                    })?,
            );
            if let Some(save_path) = &request.save_path {
                form = form.text("savepath", save_path.clone());
            }
            if let Some(category) = &request.category {
                form = form.text("category", category.clone());
            }
            if !request.tags.is_empty() {
                form = form.text("tags", request.tags.join(","));
            }
            form = form.text("paused", if request.paused { "true" } else { "false" });

            let response = self
                .client
                .post(self.url("torrents/add"))
                .multipart(form)
                .send()
                .await
                .map_err(|error| self.transport_error(&error))?;

            if response.status().as_u16() == 403 && attempt == 0 {
                *self.logged_in.lock().await = false;
                self.login().await?;
                continue;
            }
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() || body.trim().eq_ignore_ascii_case("fails.") {
                return Err(DownloaderError::Rejected {
                    name: self.name.clone(),
                    reason: format!("torrents/add answered {status}: {body}"),
                });
            }
            return Ok(RemoteTask {
                task_id: request.info_hash.clone(),
                name: None,
            });
        }
        Err(DownloaderError::AuthFailed {
            name: self.name.clone(),
        })
    }

    async fn progress(&self, hash: &str) -> DownloaderResult<TaskProgress> {
        let info = self
            .torrent_info(hash)
            .await?
            .ok_or_else(|| DownloaderError::TaskNotFound {
                name: self.name.clone(),
                hash: hash.to_string(),
            })?;
        Ok(TaskProgress {
            percent: info.progress * 100.0,
            completed: state_is_complete(info.progress, info.state.as_deref()),
            state: info.state,
        })
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        let url = self.url("torrents/pause");
        let hash = hash.to_string();
        self.with_session(|client| client.post(url.clone()).form(&[("hashes", hash.clone())]))
            .await?;
        Ok(())
    }

    async fn resume(&self, hash: &str) -> DownloaderResult<()> {
        let url = self.url("torrents/resume");
        let hash = hash.to_string();
        self.with_session(|client| client.post(url.clone()).form(&[("hashes", hash.clone())]))
            .await?;
        Ok(())
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> DownloaderResult<()> {
        let url = self.url("torrents/delete");
        let hash = hash.to_string();
        let delete = if delete_data { "true" } else { "false" };
        self.with_session(|client| {
            client.post(url.clone()).form(&[
                ("hashes", hash.clone()),
                ("deleteFiles", delete.to_string()),
            ])
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_derived_from_progress_or_state() {
        assert!(state_is_complete(1.0, Some("downloading")));
        assert!(state_is_complete(0.4, Some("stalledUP")));
        assert!(state_is_complete(0.4, Some("pausedUP")));
        assert!(!state_is_complete(0.4, Some("downloading")));
        assert!(!state_is_complete(0.4, None));
    }

    #[test]
    fn torrent_info_decodes_the_api_shape() {
        let raw = r#"[{"hash":"abc","name":"Test.Movie","progress":0.42,"state":"downloading","extra":1}]"#;
        let entries: Vec<TorrentInfo> = serde_json::from_str(raw).expect("decodes");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hash, "abc");
        assert!((entries[0].progress - 0.42).abs() < f64::EPSILON);
    }
}
