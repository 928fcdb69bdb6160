#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, missing_docs)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Typed configuration facade over the state store.
//!
//! # Design
//! - [`GlobalSettings`] is the typed view of the single `settings_global`
//!   row, with derived accessors for the eligibility gates.
//! - [`SettingsService`] owns reads/writes and validation; it is consulted
//!   on every scheduler tick so edits apply without a restart.
//! - [`WorkDir`] fixes the on-disk layout rooted at `~/.pt-tools`.

mod settings;
mod workdir;

pub use settings::GlobalSettings;
pub use workdir::WorkDir;

use thiserror::Error;
use tracklet_core::{AuthMethod, ErrorKind, SiteConfig};
use tracklet_data::{DataError, Store};

/// Convenience alias for configuration results.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Failures surfaced by the configuration facade.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential field is missing for the site's auth method.
    #[error("site {site} is missing required credential '{field}'")]
    MissingCredential {
        /// Site identifier.
        site: String,
        /// Name of the absent credential field.
        field: &'static str,
    },
    /// A settings value is out of its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
    /// Store-level failure.
    #[error(transparent)]
    Data(#[from] DataError),
}

impl ConfigError {
    /// Stable kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential { .. } | Self::InvalidValue { .. } => ErrorKind::Configuration,
            Self::Data(inner) => inner.kind(),
        }
    }
}

/// Reads, writes and validates user configuration.
#[derive(Clone)]
pub struct SettingsService {
    store: Store,
}

impl SettingsService {
    /// Wrap the store handle.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Load the current global settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn load(&self) -> Result<GlobalSettings> {
        Ok(GlobalSettings::from_row(
            self.store.load_global_settings().await?,
        ))
    }

    /// Validate and persist global settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range fields and
    /// store errors otherwise.
    pub async fn save(&self, settings: &GlobalSettings) -> Result<()> {
        settings.validate()?;
        self.store
            .save_global_settings(&settings.to_row(chrono::Utc::now()), chrono::Utc::now())
            .await?;
        Ok(())
    }

    /// Fetch a site's stored configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn site_config(&self, site_id: &str) -> Result<Option<SiteConfig>> {
        Ok(self.store.get_site_config(site_id).await?)
    }

    /// Validate a site configuration against its definition's auth method
    /// and persist it. Disabled configurations skip credential checks so a
    /// user can stage credentials incrementally.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] when an enabled
    /// configuration lacks a required credential.
    pub async fn upsert_site_config(
        &self,
        auth_method: AuthMethod,
        config: &SiteConfig,
    ) -> Result<()> {
        if config.enabled {
            validate_site_config(auth_method, config)?;
        }
        self.store
            .upsert_site_config(config, chrono::Utc::now())
            .await?;
        Ok(())
    }
}

/// Check that every credential field the auth method requires is populated.
///
/// # Errors
///
/// Returns [`ConfigError::MissingCredential`] naming the first absent field.
pub fn validate_site_config(auth_method: AuthMethod, config: &SiteConfig) -> Result<()> {
    for field in auth_method.required_fields() {
        let present = match *field {
            "cookie" => config.cookie.as_deref().is_some_and(|v| !v.trim().is_empty()),
            "api_key" => config
                .api_key
                .as_deref()
                .is_some_and(|v| !v.trim().is_empty()),
            "passkey" => config
                .passkey
                .as_deref()
                .is_some_and(|v| !v.trim().is_empty()),
            _ => true,
        };
        if !present {
            return Err(ConfigError::MissingCredential {
                site: config.site_id.clone(),
                field,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(site: &str, cookie: Option<&str>, api_key: Option<&str>) -> SiteConfig {
        SiteConfig {
            site_id: site.to_string(),
            enabled: true,
            cookie: cookie.map(str::to_string),
            api_key: api_key.map(str::to_string),
            ..SiteConfig::default()
        }
    }

    #[test]
    fn cookie_sites_need_a_cookie() {
        let ok = config_with("hdsky", Some("uid=1; pass=x"), None);
        assert!(validate_site_config(AuthMethod::Cookie, &ok).is_ok());

        let missing = config_with("hdsky", None, None);
        let err = validate_site_config(AuthMethod::Cookie, &missing).expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let blank = config_with("hdsky", Some("   "), None);
        assert!(validate_site_config(AuthMethod::Cookie, &blank).is_err());
    }

    #[test]
    fn combined_auth_requires_both_factors() {
        let only_cookie = config_with("hddolby", Some("uid=1"), None);
        let err = validate_site_config(AuthMethod::CookieAndApiKey, &only_cookie)
            .expect_err("api key missing");
        assert!(err.to_string().contains("api_key"));

        let both = config_with("hddolby", Some("uid=1"), Some("key"));
        assert!(validate_site_config(AuthMethod::CookieAndApiKey, &both).is_ok());
    }

    #[tokio::test]
    async fn settings_round_trip_through_service() {
        let store = Store::connect("sqlite::memory:").await.expect("store");
        let service = SettingsService::new(store);

        let mut settings = service.load().await.expect("defaults");
        settings.min_free_minutes = 30;
        settings.torrent_size_gb = 200;
        service.save(&settings).await.expect("save");

        let reloaded = service.load().await.expect("reload");
        assert_eq!(reloaded.min_free_minutes, 30);
        assert_eq!(reloaded.max_size_bytes(), Some(200 * 1024 * 1024 * 1024));
    }

    #[tokio::test]
    async fn save_rejects_out_of_range_values() {
        let store = Store::connect("sqlite::memory:").await.expect("store");
        let service = SettingsService::new(store);

        let mut settings = service.load().await.expect("defaults");
        settings.max_retry = 0;
        let err = service.save(&settings).await.expect_err("rejected");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
