//! Per-site request guard: a local token bucket for shaping plus a
//! persisted sliding-window cap for coarse budgets (commonly N per hour).
//!
//! The bucket queues callers; the window rejects them. Both must pass before
//! a request is issued. Window hits are journalled through
//! [`RateLimitJournal`] so a restart inside the window keeps rejecting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use tracklet_core::{RateLimitJournal, SiteConfig, SiteError, SiteResult};

use crate::definition::RateParams;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-site limiter combining both mechanisms.
pub struct SiteLimiter {
    site_id: String,
    params: RateParams,
    bucket: Mutex<Bucket>,
    window: Mutex<VecDeque<DateTime<Utc>>>,
    journal: Option<Arc<dyn RateLimitJournal>>,
    hydrated: tokio::sync::OnceCell<()>,
}

impl SiteLimiter {
    /// Build a limiter with an empty window; call [`Self::hydrate`] to
    /// replay journalled hits after a restart.
    #[must_use]
    pub fn new(
        site_id: &str,
        params: RateParams,
        journal: Option<Arc<dyn RateLimitJournal>>,
    ) -> Self {
        let burst = f64::from(params.burst.max(1));
        Self {
            site_id: site_id.to_string(),
            params,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            window: Mutex::new(VecDeque::new()),
            journal,
            hydrated: tokio::sync::OnceCell::new(),
        }
    }

    /// Merge definition defaults with per-user overrides.
    #[must_use]
    pub fn effective_params(defaults: &RateParams, config: &SiteConfig) -> RateParams {
        RateParams {
            per_second: config
                .rate_limit
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.per_second),
            burst: config.rate_burst.filter(|v| *v > 0).unwrap_or(defaults.burst),
            window: config
                .rate_window_secs
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .or(defaults.window),
            window_limit: config
                .rate_window_limit
                .filter(|v| *v > 0)
                .or(defaults.window_limit),
        }
    }

    /// Replay journalled hits still inside the window.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal read fails.
    pub async fn hydrate(&self) -> anyhow::Result<()> {
        let (Some(window), Some(journal)) = (self.params.window, self.journal.as_ref()) else {
            return Ok(());
        };
        let since = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));
        let hits = journal.load_hits(&self.site_id, since).await?;
        let mut guard = self.window.lock().await;
        *guard = hits.into_iter().collect();
        debug!(site = %self.site_id, hits = guard.len(), "rate-limit window hydrated");
        Ok(())
    }

    /// Wait for a token and claim a window slot. The first acquisition after
    /// construction replays the journal, so a freshly restarted process
    /// honors the budget it had already spent.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::RateLimited`] when the sliding window is full;
    /// the window rejects rather than queues.
    pub async fn acquire(&self) -> SiteResult<()> {
        self.hydrated
            .get_or_init(|| async {
                if let Err(error) = self.hydrate().await {
                    warn!(site = %self.site_id, error = %error, "rate-limit hydration failed");
                }
            })
            .await;
        self.check_window(false).await?;
        self.take_token().await;
        // Re-check after the potential bucket wait: a concurrent caller may
        // have consumed the last window slot in the meantime.
        self.check_window(true).await?;

        if let Some(journal) = &self.journal {
            if let Err(error) = journal.record_hit(&self.site_id, Utc::now()).await {
                warn!(site = %self.site_id, error = %error, "failed to journal rate-limit hit");
            }
        }
        Ok(())
    }

    async fn take_token(&self) {
        let rate = if self.params.per_second > 0.0 {
            self.params.per_second
        } else {
            RateParams::default().per_second
        };
        let capacity = f64::from(self.params.burst.max(1));

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                bucket.tokens = capacity.min(elapsed.mul_add(rate, bucket.tokens));
                bucket.last_refill = Instant::now();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    async fn check_window(&self, claim: bool) -> SiteResult<()> {
        let (Some(window), Some(limit)) = (self.params.window, self.params.window_limit) else {
            return Ok(());
        };
        let now = Utc::now();
        let horizon =
            now - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut guard = self.window.lock().await;
        while guard.front().is_some_and(|hit| *hit < horizon) {
            guard.pop_front();
        }
        if guard.len() >= limit as usize {
            let retry_after = guard.front().map(|oldest| {
                (*oldest + chrono::Duration::from_std(window).unwrap_or_default() - now)
                    .to_std()
                    .unwrap_or_default()
            });
            return Err(SiteError::RateLimited {
                site: self.site_id.clone(),
                retry_after,
            });
        }
        if claim {
            guard.push_back(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryJournal {
        hits: StdMutex<Vec<(String, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl RateLimitJournal for MemoryJournal {
        async fn record_hit(&self, site_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
            self.hits
                .lock()
                .expect("journal lock")
                .push((site_id.to_string(), at));
            Ok(())
        }

        async fn load_hits(
            &self,
            site_id: &str,
            since: DateTime<Utc>,
        ) -> anyhow::Result<Vec<DateTime<Utc>>> {
            Ok(self
                .hits
                .lock()
                .expect("journal lock")
                .iter()
                .filter(|(site, at)| site == site_id && *at >= since)
                .map(|(_, at)| *at)
                .collect())
        }

        async fn prune_hits(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
            let mut hits = self.hits.lock().expect("journal lock");
            let initial = hits.len();
            hits.retain(|(_, at)| *at >= before);
            Ok((initial - hits.len()) as u64)
        }
    }

    fn windowed_params(limit: u32) -> RateParams {
        RateParams {
            per_second: 1000.0,
            burst: 1000,
            window: Some(Duration::from_secs(3600)),
            window_limit: Some(limit),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_queues_beyond_burst() {
        let limiter = SiteLimiter::new(
            "hdsky",
            RateParams {
                per_second: 2.0,
                burst: 2,
                window: None,
                window_limit: None,
            },
            None,
        );

        let started = Instant::now();
        for _ in 0..2 {
            limiter.acquire().await.expect("burst tokens available");
        }
        assert!(started.elapsed() < Duration::from_millis(10));

        limiter.acquire().await.expect("queued token");
        assert!(
            started.elapsed() >= Duration::from_millis(400),
            "third acquire must wait for a refill"
        );
    }

    #[tokio::test]
    async fn window_rejects_instead_of_queueing() {
        let limiter = SiteLimiter::new("hdsky", windowed_params(3), None);
        for _ in 0..3 {
            limiter.acquire().await.expect("inside window budget");
        }
        let err = limiter.acquire().await.expect_err("window full");
        match err {
            SiteError::RateLimited { retry_after, .. } => {
                assert!(retry_after.is_some());
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn window_survives_a_restart_via_the_journal() {
        let journal: Arc<MemoryJournal> = Arc::new(MemoryJournal::default());

        let first = SiteLimiter::new("hdsky", windowed_params(2), Some(journal.clone()));
        first.acquire().await.expect("hit 1");
        first.acquire().await.expect("hit 2");
        drop(first);

        let reborn = SiteLimiter::new("hdsky", windowed_params(2), Some(journal.clone()));
        reborn.hydrate().await.expect("hydrate");
        let err = reborn.acquire().await.expect_err("window still full");
        assert!(matches!(err, SiteError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn config_overrides_merge_over_defaults() {
        let defaults = RateParams {
            per_second: 2.0,
            burst: 5,
            window: Some(Duration::from_secs(3600)),
            window_limit: Some(50),
        };
        let config = SiteConfig {
            site_id: "hdsky".to_string(),
            rate_limit: Some(0.5),
            rate_window_limit: Some(10),
            ..SiteConfig::default()
        };
        let merged = SiteLimiter::effective_params(&defaults, &config);
        assert!((merged.per_second - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged.burst, 5);
        assert_eq!(merged.window_limit, Some(10));
    }
}
