//! Base-URL failover ring.
//!
//! A site is configured with an ordered list of base URLs. The ring tracks
//! the index that last succeeded and hands out a rotation starting there;
//! the first success after a change latches the new index so subsequent
//! requests go straight to the healthy mirror.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default retry attempts per URL before rotating.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay between retries on the same URL.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Rotating view over a site's base URLs.
pub struct FailoverRing {
    urls: Vec<String>,
    current: AtomicUsize,
    max_retries: u32,
    retry_delay: Duration,
}

impl FailoverRing {
    /// Ring with the default retry policy.
    ///
    /// # Panics
    ///
    /// Panics when `urls` is empty; the registry validates this earlier.
    #[must_use]
    pub fn new(urls: Vec<String>) -> Self {
        Self::with_policy(urls, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }

    /// Ring with an explicit retry policy.
    ///
    /// # Panics
    ///
    /// Panics when `urls` is empty; the registry validates this earlier.
    #[must_use]
    pub fn with_policy(urls: Vec<String>, max_retries: u32, retry_delay: Duration) -> Self {
        assert!(!urls.is_empty(), "a site needs at least one base url");
        Self {
            urls,
            current: AtomicUsize::new(0),
            max_retries,
            retry_delay,
        }
    }

    /// Number of URLs in the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether the ring is empty; never true for a constructed ring.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// The URL requests currently start from.
    #[must_use]
    pub fn current_url(&self) -> &str {
        &self.urls[self.current.load(Ordering::Relaxed) % self.urls.len()]
    }

    /// URL at a rotation index.
    #[must_use]
    pub fn url(&self, index: usize) -> &str {
        &self.urls[index % self.urls.len()]
    }

    /// Index rotation for one request cycle, starting at the latched index.
    #[must_use]
    pub fn rotation(&self) -> Vec<usize> {
        let start = self.current.load(Ordering::Relaxed) % self.urls.len();
        (0..self.urls.len())
            .map(|offset| (start + offset) % self.urls.len())
            .collect()
    }

    /// Latch the index that just served a successful request.
    pub fn latch(&self, index: usize) {
        self.current.store(index % self.urls.len(), Ordering::Relaxed);
    }

    /// Retry attempts per URL before rotating.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay between retries on the same URL.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}
