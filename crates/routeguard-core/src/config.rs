//! Runtime configuration for the persistent compile cache.
//!
//! Reads:
//! - `ROUTEGUARD_CACHE_DIR` (optional; default `$XDG_CACHE_HOME/routeguard`,
//!   then `$HOME/.cache/routeguard`, then `./.routeguard-cache`)
//! - `ROUTEGUARD_CACHE_MAX_ENTRIES` (optional, default 10000)
//! - `ROUTEGUARD_CACHE_FLUSH_EVERY` (optional, default 50; 0 disables auto-flush)
//! - `ROUTEGUARD_NO_CACHE` (optional; `1`/`true` keeps the cache in memory only)

use std::path::{Path, PathBuf};

use crate::persist::{StoreOptions, DEFAULT_FLUSH_EVERY, MAX_ENTRIES};

pub const ENV_CACHE_DIR: &str = "ROUTEGUARD_CACHE_DIR";
pub const ENV_MAX_ENTRIES: &str = "ROUTEGUARD_CACHE_MAX_ENTRIES";
pub const ENV_FLUSH_EVERY: &str = "ROUTEGUARD_CACHE_FLUSH_EVERY";
pub const ENV_NO_CACHE: &str = "ROUTEGUARD_NO_CACHE";

const TOOL_NAME: &str = "routeguard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteguardConfig {
    pub cache_dir: PathBuf,
    pub max_entries: usize,
    pub flush_every: usize,
    /// Whether compiles are recorded to disk at all.
    pub persist: bool,
}

impl Default for RouteguardConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(format!(".{TOOL_NAME}-cache")),
            max_entries: MAX_ENTRIES,
            flush_every: DEFAULT_FLUSH_EVERY,
            persist: true,
        }
    }
}

impl RouteguardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_dir = non_empty(ENV_CACHE_DIR)
            .map(PathBuf::from)
            .or_else(|| non_empty("XDG_CACHE_HOME").map(|d| Path::new(&d).join(TOOL_NAME)))
            .or_else(|| {
                non_empty("HOME").map(|h| Path::new(&h).join(".cache").join(TOOL_NAME))
            })
            .unwrap_or(defaults.cache_dir);

        let max_entries = parse_count(ENV_MAX_ENTRIES, non_empty(ENV_MAX_ENTRIES), MAX_ENTRIES);
        let flush_every =
            parse_count(ENV_FLUSH_EVERY, non_empty(ENV_FLUSH_EVERY), DEFAULT_FLUSH_EVERY);
        let persist = !non_empty(ENV_NO_CACHE)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            cache_dir,
            max_entries,
            flush_every,
            persist,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_entries: self.max_entries,
            flush_every: self.flush_every,
        }
    }
}

fn parse_count(key: &str, raw: Option<String>, default: usize) -> usize {
    match raw {
        None => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = key, value = %v, default, "invalid count, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = RouteguardConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, RouteguardConfig::default());
        assert_eq!(cfg.cache_dir, PathBuf::from(".routeguard-cache"));
    }

    #[test]
    fn test_cache_dir_precedence() {
        let cfg = RouteguardConfig::from_lookup(lookup(&[("HOME", "/home/ci")]));
        assert_eq!(cfg.cache_dir, PathBuf::from("/home/ci/.cache/routeguard"));

        let cfg = RouteguardConfig::from_lookup(lookup(&[
            ("HOME", "/home/ci"),
            ("XDG_CACHE_HOME", "/xdg"),
        ]));
        assert_eq!(cfg.cache_dir, PathBuf::from("/xdg/routeguard"));

        let cfg = RouteguardConfig::from_lookup(lookup(&[
            ("HOME", "/home/ci"),
            ("XDG_CACHE_HOME", "/xdg"),
            (ENV_CACHE_DIR, "/tmp/rg"),
        ]));
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/rg"));
    }

    #[test]
    fn test_numeric_overrides_and_fallback() {
        let cfg = RouteguardConfig::from_lookup(lookup(&[
            (ENV_MAX_ENTRIES, "25"),
            (ENV_FLUSH_EVERY, "many"),
        ]));
        assert_eq!(cfg.max_entries, 25);
        assert_eq!(cfg.flush_every, DEFAULT_FLUSH_EVERY);
    }

    #[test]
    fn test_no_cache_flag() {
        assert!(!RouteguardConfig::from_lookup(lookup(&[(ENV_NO_CACHE, "1")])).persist);
        assert!(!RouteguardConfig::from_lookup(lookup(&[(ENV_NO_CACHE, "TRUE")])).persist);
        assert!(RouteguardConfig::from_lookup(lookup(&[(ENV_NO_CACHE, "0")])).persist);
    }

    #[test]
    fn test_builders() {
        let cfg = RouteguardConfig::default()
            .with_cache_dir("/c")
            .with_max_entries(3)
            .with_flush_every(0)
            .with_persist(false);
        assert_eq!(cfg.store_options().max_entries, 3);
        assert_eq!(cfg.store_options().flush_every, 0);
        assert!(!cfg.persist);
    }
}
