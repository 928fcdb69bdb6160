//! Error taxonomy shared by site drivers and downloader clients.
//!
//! Every surfaced error maps onto a stable [`ErrorKind`]; boundaries (HTTP
//! handlers, CLI) translate kinds into status codes without inspecting
//! variant internals.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for site driver results.
pub type SiteResult<T> = Result<T, SiteError>;

/// Convenience alias for downloader client results.
pub type DownloaderResult<T> = Result<T, DownloaderError>;

/// Failures surfaced by tracker backends.
#[derive(Debug, Error)]
pub enum SiteError {
    /// Credentials rejected outright; never retried, never failed over.
    #[error("invalid credentials for site {site}")]
    InvalidCredentials {
        /// Site identifier.
        site: String,
    },
    /// A previously valid session is gone; requires re-authentication.
    #[error("session expired for site {site}")]
    SessionExpired {
        /// Site identifier.
        site: String,
    },
    /// The site demanded a second factor the service cannot provide.
    #[error("two-factor challenge required for site {site}")]
    TwoFactorRequired {
        /// Site identifier.
        site: String,
    },
    /// Local limiter rejection or an HTTP 429 from the site.
    #[error("rate limited by site {site}")]
    RateLimited {
        /// Site identifier.
        site: String,
        /// Suggested back-off when the site provided one.
        retry_after: Option<Duration>,
    },
    /// The failover ring was exhausted without a single success.
    #[error("all base urls failed for site {site} after {attempts} attempts")]
    AllUrlsFailed {
        /// Site identifier.
        site: String,
        /// Total request attempts across the ring.
        attempts: u32,
        /// Last error observed before giving up.
        #[source]
        last: Box<SiteError>,
    },
    /// Unexpected HTTP status outside the auth/rate-limit classes.
    #[error("site {site} returned http status {status}")]
    Http {
        /// Site identifier.
        site: String,
        /// Status code as received.
        status: u16,
    },
    /// Connection-level failure: refused, reset, DNS, timeout.
    #[error("network failure talking to site {site}: {message}")]
    Network {
        /// Site identifier.
        site: String,
        /// Transport error description.
        message: String,
    },
    /// The response arrived but could not be interpreted.
    #[error("failed to parse {what} from site {site}")]
    Parse {
        /// Site identifier.
        site: String,
        /// What was being parsed, e.g. a selector name or payload field.
        what: String,
    },
    /// The referenced torrent does not exist on the site.
    #[error("torrent {reference} not found on site {site}")]
    NotFound {
        /// Site identifier.
        site: String,
        /// The id, link or guid that missed.
        reference: String,
    },
    /// The driver family does not implement the requested operation.
    #[error("operation {operation} not supported by site {site}")]
    Unsupported {
        /// Site identifier.
        site: String,
        /// Operation name.
        operation: &'static str,
    },
    /// The caller's cancellation context fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl SiteError {
    /// Stable kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials { .. }
            | Self::SessionExpired { .. }
            | Self::TwoFactorRequired { .. } => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AllUrlsFailed { .. } | Self::Network { .. } => ErrorKind::Network,
            Self::Http { status, .. } => {
                if *status >= 500 {
                    ErrorKind::Network
                } else {
                    ErrorKind::Parse
                }
            }
            Self::Parse { .. } => ErrorKind::Parse,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the failover manager may retry this request on the same or the
    /// next URL. Authentication failures hit every mirror identically and
    /// rate limits only get worse under retry, so neither qualifies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failures surfaced by downloader clients.
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// The daemon could not be reached at all.
    #[error("downloader {name} unreachable: {message}")]
    Unreachable {
        /// Downloader display name.
        name: String,
        /// Transport error description.
        message: String,
    },
    /// Login or session establishment failed.
    #[error("downloader {name} rejected the configured credentials")]
    AuthFailed {
        /// Downloader display name.
        name: String,
    },
    /// The daemon answered with something the client cannot interpret.
    #[error("downloader {name} protocol error: {message}")]
    Protocol {
        /// Downloader display name.
        name: String,
        /// Error description.
        message: String,
    },
    /// The daemon refused the operation (disk full, duplicate, bad path).
    #[error("downloader {name} rejected the request: {reason}")]
    Rejected {
        /// Downloader display name.
        name: String,
        /// Reason as reported by the daemon.
        reason: String,
    },
    /// No task with the given hash exists on the daemon.
    #[error("downloader {name} has no task for hash {hash}")]
    TaskNotFound {
        /// Downloader display name.
        name: String,
        /// Info-hash that missed.
        hash: String,
    },
}

impl DownloaderError {
    /// Stable kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::Network,
            Self::AuthFailed { .. } => ErrorKind::Authentication,
            Self::Protocol { .. } | Self::Rejected { .. } => ErrorKind::Dispatch,
            Self::TaskNotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// Coarse error classes shared across the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration rejected at a boundary.
    Configuration,
    /// Credential or session problems.
    Authentication,
    /// Local or remote rate limiting.
    RateLimited,
    /// Transport-level failures, including 5xx responses.
    Network,
    /// Response arrived but could not be interpreted.
    Parse,
    /// Referenced entity does not exist.
    NotFound,
    /// Downloader-side refusal.
    Dispatch,
    /// Repository constraint violation.
    Invariant,
    /// Operation not implemented by the backend.
    Unsupported,
    /// Cooperative cancellation.
    Cancelled,
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::NotFound => "not_found",
            Self::Dispatch => "dispatch",
            Self::Invariant => "invariant",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status a boundary should answer with for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Configuration => 400,
            Self::Authentication => 401,
            Self::RateLimited => 429,
            Self::NotFound => 404,
            Self::Network => 503,
            Self::Parse | Self::Dispatch | Self::Invariant => 500,
            Self::Unsupported => 501,
            Self::Cancelled => 499,
        }
    }
}
