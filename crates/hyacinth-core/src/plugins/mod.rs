//! Scraper plugins and the registry that resolves them by stable identifier.
//!
//! Searches persist a `plugin_path` of the form `<namespace>:<symbol>`. The
//! registry maps those identifiers to constructors registered at startup and
//! builds every enabled plugin eagerly, so a stale identifier in config fails
//! at load time instead of on the first poll.

pub mod json_feed;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;

use crate::{listing::RawListing, Error, Result};

pub type Criteria = BTreeMap<String, String>;

/// The single capability a source plugin provides.
#[async_trait]
pub trait ScraperPlugin: Send + Sync {
    /// Short alias users type in `notify <name>`.
    fn name(&self) -> &str;

    /// Reject criteria the plugin cannot evaluate, before a search is saved.
    fn validate_criteria(&self, _criteria: &Criteria) -> Result<()> {
        Ok(())
    }

    /// Produce listings in source order. "No results" is `Ok(vec![])`;
    /// transport and parse failures are `Error::Scrape`.
    async fn scrape(&self, criteria: &Criteria) -> Result<Vec<RawListing>>;
}

/// Settings handed to plugin constructors.
#[derive(Clone, Debug)]
pub struct PluginSettings {
    pub scrape_timeout: Duration,
}

type Constructor = Box<dyn Fn(&PluginSettings) -> Result<Arc<dyn ScraperPlugin>> + Send + Sync>;

/// Collects constructors before the registry is frozen.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    constructors: HashMap<String, Constructor>,
}

impl PluginRegistryBuilder {
    pub fn register(
        mut self,
        path: &str,
        ctor: impl Fn(&PluginSettings) -> Result<Arc<dyn ScraperPlugin>> + Send + Sync + 'static,
    ) -> Result<Self> {
        validate_plugin_path(path)?;
        if self.constructors.contains_key(path) {
            return Err(Error::Config(format!("plugin {path} registered twice")));
        }
        self.constructors.insert(path.to_string(), Box::new(ctor));
        Ok(self)
    }

    /// Register an already-built plugin under `path`.
    pub fn register_instance(self, path: &str, plugin: Arc<dyn ScraperPlugin>) -> Result<Self> {
        self.register(path, move |_| Ok(plugin.clone()))
    }

    /// Build every plugin in `enabled`, failing on the first unknown identifier.
    pub fn build(self, settings: &PluginSettings, enabled: &[String]) -> Result<PluginRegistry> {
        let mut plugins = BTreeMap::new();
        let mut aliases = HashMap::new();

        for path in enabled {
            validate_plugin_path(path)?;
            let Some(ctor) = self.constructors.get(path) else {
                return Err(Error::unknown_plugin(path, "no plugin registered under this identifier"));
            };
            let plugin = ctor(settings)?;
            let alias = plugin.name().to_lowercase();
            if let Some(prev) = aliases.insert(alias.clone(), path.clone()) {
                return Err(Error::Config(format!(
                    "plugins {prev} and {path} share the name {alias}"
                )));
            }
            plugins.insert(path.clone(), plugin);
        }

        tracing::info!(count = plugins.len(), "plugins loaded");
        Ok(PluginRegistry { plugins, aliases })
    }
}

/// Immutable map from stable plugin identifiers to live plugin handles.
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn ScraperPlugin>>,
    aliases: HashMap<String, String>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Resolve `plugin_path`. Deterministic; returns the same shared handle each time.
    pub fn resolve(&self, plugin_path: &str) -> Result<Arc<dyn ScraperPlugin>> {
        validate_plugin_path(plugin_path)?;
        self.plugins
            .get(plugin_path)
            .cloned()
            .ok_or_else(|| Error::unknown_plugin(plugin_path, "plugin is not loaded"))
    }

    /// Map a user-typed name (alias or full path) to a loaded plugin path.
    pub fn lookup(&self, name_or_path: &str) -> Option<&str> {
        if let Some((path, _)) = self.plugins.get_key_value(name_or_path) {
            return Some(path.as_str());
        }
        self.aliases
            .get(&name_or_path.to_lowercase())
            .map(String::as_str)
    }

    /// Loaded identifiers with their aliases, sorted by identifier.
    pub fn loaded(&self) -> Vec<(&str, &str)> {
        self.plugins
            .iter()
            .map(|(path, p)| (path.as_str(), p.name()))
            .collect()
    }
}

/// Check the `<namespace>:<symbol>` shape.
pub fn validate_plugin_path(path: &str) -> Result<()> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*:[A-Za-z_][A-Za-z0-9_]*$")
            .expect("valid regex")
    });
    if re.is_match(path) {
        Ok(())
    } else {
        Err(Error::unknown_plugin(
            path,
            "malformed identifier, expected <namespace>:<symbol>",
        ))
    }
}

/// Builder with the plugins that ship with the bot.
pub fn builtin_plugins() -> Result<PluginRegistryBuilder> {
    PluginRegistry::builder().register(json_feed::JSON_FEED_PLUGIN_PATH, |settings| {
        Ok(Arc::new(json_feed::JsonFeedPlugin::new(settings)?) as Arc<dyn ScraperPlugin>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ScraperPlugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn scrape(&self, _criteria: &Criteria) -> Result<Vec<RawListing>> {
            Ok(vec![])
        }
    }

    fn settings() -> PluginSettings {
        PluginSettings {
            scrape_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn path_shape_is_validated() {
        assert!(validate_plugin_path("plugins.craigslist.plugin:CraigslistPlugin").is_ok());
        assert!(validate_plugin_path("single:Sym").is_ok());
        for bad in ["", "nocolon", "a:b:c", ":Sym", "mod:", "mod..x:Sym", "1mod:Sym", "mod:Sym Extra"] {
            assert!(
                matches!(validate_plugin_path(bad), Err(Error::UnknownPlugin { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn build_fails_fast_on_unknown_plugin() {
        let builder = PluginRegistry::builder()
            .register_instance("tests.a:Alpha", Arc::new(Named("alpha")))
            .unwrap();
        let err = builder
            .build(&settings(), &["tests.a:Alpha".to_string(), "tests.b:Beta".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownPlugin { ref path, .. } if path == "tests.b:Beta"));
    }

    #[test]
    fn resolve_returns_the_same_handle() {
        let registry = PluginRegistry::builder()
            .register_instance("tests.a:Alpha", Arc::new(Named("alpha")))
            .unwrap()
            .register_instance("tests.b:Beta", Arc::new(Named("beta")))
            .unwrap()
            .build(&settings(), &["tests.a:Alpha".to_string()])
            .unwrap();

        let a1 = registry.resolve("tests.a:Alpha").unwrap();
        let a2 = registry.resolve("tests.a:Alpha").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));

        // Registered but not enabled.
        assert!(matches!(
            registry.resolve("tests.b:Beta"),
            Err(Error::UnknownPlugin { .. })
        ));
        assert!(matches!(
            registry.resolve("not a path"),
            Err(Error::UnknownPlugin { .. })
        ));
    }

    #[test]
    fn lookup_accepts_alias_or_path() {
        let registry = PluginRegistry::builder()
            .register_instance("tests.a:Alpha", Arc::new(Named("Alpha")))
            .unwrap()
            .build(&settings(), &["tests.a:Alpha".to_string()])
            .unwrap();
        assert_eq!(registry.lookup("alpha"), Some("tests.a:Alpha"));
        assert_eq!(registry.lookup("ALPHA"), Some("tests.a:Alpha"));
        assert_eq!(registry.lookup("tests.a:Alpha"), Some("tests.a:Alpha"));
        assert_eq!(registry.lookup("beta"), None);
        assert_eq!(registry.loaded(), vec![("tests.a:Alpha", "Alpha")]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let res = PluginRegistry::builder()
            .register_instance("tests.a:Alpha", Arc::new(Named("alpha")))
            .unwrap()
            .register_instance("tests.a:Alpha", Arc::new(Named("alpha")));
        assert!(res.is_err());
    }
}
