//! Shared HTTP plumbing for site drivers: one client per site, auth header
//! application, rate-limit acquisition and URL failover around every
//! request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};
use tracklet_core::{RateLimitJournal, SiteConfig, SiteError, SiteResult};

use crate::definition::{SiteDefinition, SiteSchema};
use crate::failover::FailoverRing;
use crate::ratelimit::SiteLimiter;

/// Default timeout applied to every site request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request body shapes drivers send.
#[derive(Debug, Clone)]
pub enum Payload {
    /// No body.
    None,
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(serde_json::Value),
}

/// Everything a driver needs to talk to its site: definition, user config,
/// limiter, failover ring and the HTTP client.
pub struct SiteContext {
    definition: Arc<SiteDefinition>,
    config: SiteConfig,
    limiter: Arc<SiteLimiter>,
    ring: FailoverRing,
    client: Client,
}

impl SiteContext {
    /// Build the context for one site. The client honors the standard proxy
    /// environment variables and carries the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        definition: Arc<SiteDefinition>,
        config: SiteConfig,
        journal: Option<Arc<dyn RateLimitJournal>>,
    ) -> SiteResult<Self> {
        if definition.base_urls.is_empty() {
            return Err(SiteError::Network {
                site: definition.id.to_string(),
                message: "definition carries no base urls".to_string(),
            });
        }
        let params = SiteLimiter::effective_params(&definition.rate, &config);
        let limiter = Arc::new(SiteLimiter::new(definition.id, params, journal));
        let ring = FailoverRing::new(definition.base_urls.clone());
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("tracklet/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| SiteError::Network {
                site: definition.id.to_string(),
                message: error.to_string(),
            })?;

        Ok(Self {
            definition,
            config,
            limiter,
            ring,
            client,
        })
    }

    /// Override the per-URL retry policy; mainly used to shorten test runs.
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.ring = FailoverRing::with_policy(
            self.definition.base_urls.clone(),
            max_retries,
            retry_delay,
        );
        self
    }

    /// Route requests directly, ignoring the proxy environment. Useful for
    /// sites on the local network and for tests against loopback servers.
    #[must_use]
    pub fn with_direct_transport(mut self) -> Self {
        match Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("tracklet/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
        {
            Ok(client) => self.client = client,
            Err(error) => {
                warn!(site = %self.site_id(), error = %error, "failed to rebuild direct client");
            }
        }
        self
    }

    /// The site definition.
    #[must_use]
    pub fn definition(&self) -> &SiteDefinition {
        &self.definition
    }

    /// The user configuration.
    #[must_use]
    pub const fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Stable site id.
    #[must_use]
    pub fn site_id(&self) -> &str {
        self.definition.id
    }

    /// The site's declared UTC offset for local timestamps.
    #[must_use]
    pub fn tz_offset(&self) -> i8 {
        self.definition.timezone_offset_hours
    }

    /// The shared limiter, exposed so the factory can hydrate it.
    #[must_use]
    pub fn limiter(&self) -> Arc<SiteLimiter> {
        Arc::clone(&self.limiter)
    }

    /// The base URL requests currently start from; used to absolutise links
    /// scraped out of relative hrefs.
    #[must_use]
    pub fn current_base(&self) -> String {
        self.ring.current_url().trim_end_matches('/').to_string()
    }

    /// Substitute `{}` in an endpoint template with a URL-encoded argument.
    #[must_use]
    pub fn resolve_path(&self, template: &str, argument: &str) -> String {
        template.replace("{}", &urlencoding::encode(argument))
    }

    /// GET returning the raw response.
    ///
    /// # Errors
    ///
    /// Propagates rate-limit, auth, network and failover errors per the
    /// request loop rules.
    pub async fn get(&self, path: &str) -> SiteResult<Response> {
        self.request(Method::GET, path, &Payload::None).await
    }

    /// GET returning the body as text.
    ///
    /// # Errors
    ///
    /// As [`Self::get`], plus a network error when the body read fails.
    pub async fn get_text(&self, path: &str) -> SiteResult<String> {
        let response = self.get(path).await?;
        response.text().await.map_err(|error| SiteError::Network {
            site: self.site_id().to_string(),
            message: error.to_string(),
        })
    }

    /// GET returning the body bytes.
    ///
    /// # Errors
    ///
    /// As [`Self::get`], plus a network error when the body read fails.
    pub async fn get_bytes(&self, path: &str) -> SiteResult<Vec<u8>> {
        let response = self.get(path).await?;
        let bytes = response.bytes().await.map_err(|error| SiteError::Network {
            site: self.site_id().to_string(),
            message: error.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// GET an absolute URL (e.g. a tokenised download link handed out by
    /// the site) returning the body bytes. Rate limiting still applies;
    /// failover does not, since the URL is not relative to a base.
    ///
    /// # Errors
    ///
    /// Propagates rate-limit and network errors; non-success statuses map
    /// like the relative request path.
    pub async fn get_bytes_absolute(&self, url: &str) -> SiteResult<Vec<u8>> {
        let site = self.site_id().to_string();
        self.limiter.acquire().await?;

        let mut builder = self.client.get(url);
        for (name, value) in self.auth_headers() {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(|error| SiteError::Network {
            site: site.clone(),
            message: error.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => SiteError::SessionExpired { site },
                429 => SiteError::RateLimited {
                    site,
                    retry_after: None,
                },
                code => SiteError::Http { site, status: code },
            });
        }
        let bytes = response.bytes().await.map_err(|error| SiteError::Network {
            site,
            message: error.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// GET decoding a JSON body.
    ///
    /// # Errors
    ///
    /// As [`Self::get`], plus a parse error when decoding fails.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SiteResult<T> {
        let response = self.get(path).await?;
        self.decode_json(response).await
    }

    /// POST a JSON document, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// As [`Self::get`], plus a parse error when decoding fails.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> SiteResult<T> {
        let response = self
            .request(Method::POST, path, &Payload::Json(body))
            .await?;
        self.decode_json(response).await
    }

    /// POST form fields, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// As [`Self::get`], plus a parse error when decoding fails.
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: Vec<(String, String)>,
    ) -> SiteResult<T> {
        let response = self
            .request(Method::POST, path, &Payload::Form(fields))
            .await?;
        self.decode_json(response).await
    }

    async fn decode_json<T: DeserializeOwned>(&self, response: Response) -> SiteResult<T> {
        response.json().await.map_err(|error| SiteError::Parse {
            site: self.site_id().to_string(),
            what: format!("json body: {error}"),
        })
    }

    /// Headers carrying the site's auth factor, per driver family.
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        match self.definition.schema.family() {
            SiteSchema::NexusPhp | SiteSchema::Gazelle => {
                if let Some(cookie) = &self.config.cookie {
                    headers.push(("Cookie", cookie.clone()));
                }
            }
            SiteSchema::MTorrent => {
                if let Some(api_key) = &self.config.api_key {
                    headers.push(("x-api-key", api_key.clone()));
                }
            }
            SiteSchema::Unit3d => {
                if let Some(api_key) = &self.config.api_key {
                    headers.push(("Authorization", format!("Bearer {api_key}")));
                }
            }
            // Families already collapse; the remaining variants cannot reach
            // here but the match must stay exhaustive.
            SiteSchema::HdDolby | SiteSchema::Rousi => {}
        }
        headers
    }

    /// One logical request: rate-limit acquisition per attempt, bounded
    /// retries per URL, rotation across the ring, index latch on success.
    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: &Payload,
    ) -> SiteResult<Response> {
        let site = self.site_id().to_string();
        let mut attempts: u32 = 0;
        let mut last_error = SiteError::Network {
            site: site.clone(),
            message: "no attempt was made".to_string(),
        };

        for index in self.ring.rotation() {
            let base = self.ring.url(index).trim_end_matches('/').to_string();
            let url = format!("{base}/{}", path.trim_start_matches('/'));

            for attempt in 0..=self.ring.max_retries() {
                self.limiter.acquire().await?;
                attempts += 1;

                let mut builder = self.client.request(method.clone(), url.as_str());
                for (name, value) in self.auth_headers() {
                    builder = builder.header(name, value);
                }
                builder = match payload {
                    Payload::None => builder,
                    Payload::Form(fields) => builder.form(fields),
                    Payload::Json(body) => builder.json(body),
                };

                match builder.send().await {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            self.ring.latch(index);
                            return Ok(response);
                        }
                        match status.as_u16() {
                            401 | 403 => {
                                return Err(SiteError::SessionExpired { site });
                            }
                            429 => {
                                let retry_after = response
                                    .headers()
                                    .get("Retry-After")
                                    .and_then(|v| v.to_str().ok())
                                    .and_then(|v| v.parse::<u64>().ok())
                                    .map(Duration::from_secs);
                                return Err(SiteError::RateLimited { site, retry_after });
                            }
                            code if code >= 500 => {
                                warn!(site = %site, url = %url, status = code, "server error, will retry");
                                last_error = SiteError::Http { site: site.clone(), status: code };
                            }
                            code => {
                                return Err(SiteError::Http { site, status: code });
                            }
                        }
                    }
                    Err(error) => {
                        warn!(site = %site, url = %url, error = %error, "request failed, will retry");
                        last_error = SiteError::Network {
                            site: site.clone(),
                            message: error.to_string(),
                        };
                    }
                }

                if attempt < self.ring.max_retries() {
                    sleep(self.ring.retry_delay()).await;
                }
            }
            debug!(site = %site, url = %base, "rotating to the next base url");
        }

        Err(SiteError::AllUrlsFailed {
            site,
            attempts,
            last: Box::new(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_status_server(status: u16) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buffer = [0_u8; 4096];
                let _ = socket.read(&mut buffer).await;
                let body = "ok";
                let response = format!(
                    "HTTP/1.1 {status} Status\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn context_for(urls: Vec<String>) -> SiteContext {
        let mut definition =
            SiteDefinition::new("testsite", SiteSchema::NexusPhp, "Test Site");
        definition.base_urls = urls;
        let config = SiteConfig {
            site_id: "testsite".to_string(),
            enabled: true,
            cookie: Some("uid=1".to_string()),
            ..SiteConfig::default()
        };
        SiteContext::new(Arc::new(definition), config, None)
            .expect("context builds")
            .with_retry_policy(2, Duration::from_millis(5))
            .with_direct_transport()
    }

    #[tokio::test]
    async fn failover_rotates_past_a_dead_mirror_and_latches() {
        let (bad_url, bad_hits) = spawn_status_server(502).await;
        let (good_url, good_hits) = spawn_status_server(200).await;
        let context = context_for(vec![bad_url, good_url]);

        let body = context.get_text("index.php").await.expect("failed over");
        assert_eq!(body, "ok");
        assert_eq!(
            bad_hits.load(Ordering::SeqCst),
            3,
            "one attempt plus two retries against the dead mirror"
        );
        assert_eq!(good_hits.load(Ordering::SeqCst), 1);

        // The healthy mirror is latched: the next request skips the dead one.
        let _ = context.get_text("index.php").await.expect("second request");
        assert_eq!(bad_hits.load(Ordering::SeqCst), 3);
        assert_eq!(good_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ring_exhaustion_reports_all_urls_failed() {
        let (bad_a, _) = spawn_status_server(500).await;
        let (bad_b, _) = spawn_status_server(503).await;
        let context = context_for(vec![bad_a, bad_b]);

        let err = context.get_text("index.php").await.expect_err("all dead");
        match err {
            SiteError::AllUrlsFailed { attempts, last, .. } => {
                assert_eq!(attempts, 6, "three attempts per mirror");
                assert!(matches!(*last, SiteError::Http { status: 503, .. }));
            }
            other => panic!("expected AllUrlsFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failures_abort_without_rotation() {
        let (unauth, unauth_hits) = spawn_status_server(403).await;
        let (good, good_hits) = spawn_status_server(200).await;
        let context = context_for(vec![unauth, good]);

        let err = context.get_text("index.php").await.expect_err("auth error");
        assert!(matches!(err, SiteError::SessionExpired { .. }));
        assert_eq!(
            unauth_hits.load(Ordering::SeqCst),
            1,
            "auth failures are terminal"
        );
        assert_eq!(good_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_errors_other_than_auth_do_not_rotate() {
        let (missing, missing_hits) = spawn_status_server(404).await;
        let (good, good_hits) = spawn_status_server(200).await;
        let context = context_for(vec![missing, good]);

        let err = context.get_text("index.php").await.expect_err("404");
        assert!(matches!(err, SiteError::Http { status: 404, .. }));
        assert_eq!(missing_hits.load(Ordering::SeqCst), 1);
        assert_eq!(good_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn path_templates_encode_their_argument() {
        let context = context_for(vec!["http://127.0.0.1:1".to_string()]);
        assert_eq!(
            context.resolve_path("torrents.php?search={}", "Game of Thrones"),
            "torrents.php?search=Game%20of%20Thrones"
        );
    }
}
