//! Process-wide site definition catalog and driver-factory registry.
//!
//! Definitions are registered explicitly at bootstrap (see
//! [`crate::builtin::register_all`]); after that the registry is read-only
//! and shared behind an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracklet_core::{ErrorKind, RateLimitJournal, Site, SiteConfig};

use crate::definition::{DriverFactory, SiteDefinition, SiteSchema, normalize_url};
use crate::drivers;
use crate::http::SiteContext;

/// Failures surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two definitions claimed the same id.
    #[error("duplicate site definition id '{id}'")]
    DuplicateId {
        /// Offending id.
        id: String,
    },
    /// The referenced definition does not exist.
    #[error("unknown site id '{id}'")]
    UnknownSite {
        /// Missing id.
        id: String,
    },
    /// The definition is marked unavailable.
    #[error("site '{id}' is marked unavailable")]
    Unavailable {
        /// Offending id.
        id: String,
    },
    /// No factory resolves the definition's schema and it supplies no
    /// custom constructor.
    #[error("no driver factory for site '{id}' (schema {schema})")]
    NoFactory {
        /// Offending id.
        id: String,
        /// Schema label that failed to resolve.
        schema: &'static str,
    },
    /// Driver construction failed.
    #[error("failed to construct driver for site '{id}': {message}")]
    Construction {
        /// Offending id.
        id: String,
        /// Failure description.
        message: String,
    },
}

impl RegistryError {
    /// Stable kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSite { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Configuration,
        }
    }
}

/// Catalog of site definitions plus the schema → driver factory table.
pub struct SiteRegistry {
    definitions: BTreeMap<&'static str, Arc<SiteDefinition>>,
    factories: HashMap<SiteSchema, DriverFactory>,
}

impl SiteRegistry {
    /// Empty catalog with the four protocol-family factories registered.
    #[must_use]
    pub fn new() -> Self {
        let mut factories: HashMap<SiteSchema, DriverFactory> = HashMap::new();
        factories.insert(SiteSchema::NexusPhp, drivers::nexusphp::create);
        factories.insert(SiteSchema::MTorrent, drivers::mtorrent::create);
        factories.insert(SiteSchema::Gazelle, drivers::gazelle::create);
        factories.insert(SiteSchema::Unit3d, drivers::unit3d::create);
        Self {
            definitions: BTreeMap::new(),
            factories,
        }
    }

    /// Register a definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] when the id is already taken.
    pub fn register(&mut self, definition: SiteDefinition) -> Result<(), RegistryError> {
        if self.definitions.contains_key(definition.id) {
            return Err(RegistryError::DuplicateId {
                id: definition.id.to_string(),
            });
        }
        self.definitions
            .insert(definition.id, Arc::new(definition));
        Ok(())
    }

    /// Register (or replace) a schema factory.
    pub fn register_factory(&mut self, schema: SiteSchema, factory: DriverFactory) {
        self.factories.insert(schema, factory);
    }

    /// Look a definition up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<SiteDefinition>> {
        self.definitions.get(id).map(Arc::clone)
    }

    /// All definitions in deterministic id order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<SiteDefinition>> {
        self.definitions.values().map(Arc::clone).collect()
    }

    /// All registered ids in deterministic order.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.definitions.keys().copied().collect()
    }

    /// Walk every definition and report problems: empty URL lists,
    /// unresolvable schemas, and URLs that collide after normalisation.
    /// Issues are warnings at runtime; the registry test treats any issue
    /// as a failure.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen_urls: HashMap<String, &'static str> = HashMap::new();

        for definition in self.definitions.values() {
            if definition.id.trim().is_empty() {
                issues.push("definition with an empty id".to_string());
            }
            if definition.base_urls.is_empty() {
                issues.push(format!("site '{}' has no base urls", definition.id));
            }
            if definition.create_driver.is_none() && self.resolve_factory(definition).is_none() {
                issues.push(format!(
                    "site '{}' has schema {} with no registered factory",
                    definition.id,
                    definition.schema.as_str()
                ));
            }

            let mut within: HashSet<String> = HashSet::new();
            for url in definition.base_urls.iter().chain(&definition.legacy_urls) {
                let normalized = normalize_url(url);
                if !within.insert(normalized.clone()) {
                    issues.push(format!(
                        "site '{}' lists url '{}' twice",
                        definition.id, normalized
                    ));
                    continue;
                }
                if let Some(other) = seen_urls.insert(normalized.clone(), definition.id) {
                    if other != definition.id {
                        issues.push(format!(
                            "url '{normalized}' is claimed by both '{other}' and '{}'",
                            definition.id
                        ));
                    }
                }
            }
        }
        issues
    }

    fn resolve_factory(&self, definition: &SiteDefinition) -> Option<DriverFactory> {
        self.factories
            .get(&definition.schema)
            .or_else(|| self.factories.get(&definition.schema.family()))
            .copied()
    }

    /// Construct a live driver for a definition: the definition's own
    /// factory when present, otherwise the schema-family factory.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the site is unavailable, the schema
    /// resolves to no factory, or the HTTP context cannot be built.
    pub fn create_site(
        &self,
        definition: &Arc<SiteDefinition>,
        config: SiteConfig,
        journal: Option<Arc<dyn RateLimitJournal>>,
    ) -> Result<Arc<dyn Site>, RegistryError> {
        if definition.unavailable {
            return Err(RegistryError::Unavailable {
                id: definition.id.to_string(),
            });
        }
        let factory = definition
            .create_driver
            .or_else(|| self.resolve_factory(definition))
            .ok_or(RegistryError::NoFactory {
                id: definition.id.to_string(),
                schema: definition.schema.as_str(),
            })?;

        let context = SiteContext::new(Arc::clone(definition), config, journal).map_err(
            |error| RegistryError::Construction {
                id: definition.id.to_string(),
                message: error.to_string(),
            },
        )?;
        Ok(factory(context))
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &'static str, url: &str) -> SiteDefinition {
        let mut definition = SiteDefinition::new(id, SiteSchema::NexusPhp, id);
        definition.base_urls = vec![url.to_string()];
        definition
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = SiteRegistry::new();
        registry
            .register(definition("hdsky", "https://hdsky.me"))
            .expect("first registration");
        let err = registry
            .register(definition("hdsky", "https://other.example"))
            .expect_err("duplicate id");
        assert!(matches!(err, RegistryError::DuplicateId { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn all_returns_definitions_in_id_order() {
        let mut registry = SiteRegistry::new();
        registry
            .register(definition("zeta", "https://zeta.example"))
            .expect("zeta");
        registry
            .register(definition("alpha", "https://alpha.example"))
            .expect("alpha");
        assert_eq!(registry.ids(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn validation_flags_missing_urls_and_collisions() {
        let mut registry = SiteRegistry::new();
        registry
            .register(SiteDefinition::new("empty", SiteSchema::NexusPhp, "Empty"))
            .expect("empty");
        registry
            .register(definition("a", "https://shared.example/"))
            .expect("a");
        registry
            .register(definition("b", "HTTPS://Shared.example"))
            .expect("b");

        let issues = registry.validate();
        assert!(issues.iter().any(|i| i.contains("no base urls")));
        assert!(issues.iter().any(|i| i.contains("claimed by both")));
    }

    #[test]
    fn create_site_resolves_through_the_family_factory() {
        let mut registry = SiteRegistry::new();
        registry
            .register(definition("hdsky", "https://hdsky.me"))
            .expect("register");
        let def = registry.get("hdsky").expect("present");
        let site = registry
            .create_site(&def, SiteConfig::default(), None)
            .expect("driver builds");
        assert_eq!(site.id(), "hdsky");
    }

    #[test]
    fn unavailable_sites_are_not_constructible() {
        let mut registry = SiteRegistry::new();
        let mut dead = definition("gone", "https://gone.example");
        dead.unavailable = true;
        registry.register(dead).expect("register");
        let def = registry.get("gone").expect("present");
        let err = match registry.create_site(&def, SiteConfig::default(), None) {
            Err(err) => err,
            Ok(_) => panic!("unavailable"),
        };
        assert!(matches!(err, RegistryError::Unavailable { .. }));
    }
}
