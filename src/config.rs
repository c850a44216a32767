//! Resolver configuration
//!
//! A small TOML-backed configuration for the indexer and resolver. All
//! fields have working defaults, so embedding tools can ignore this
//! module entirely and pass [`ResolverConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VarScopeError};

/// Tunables for indexing and runtime resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Target pointer width in bytes; 0 means "take it from the debug
    /// info's address size".
    pub pointer_width: u8,
    /// Bound on indirect-type resolution depth. Reference chains longer
    /// than this fail closed to the unknown-type marker.
    pub max_resolve_depth: usize,
    /// Whether call/return events maintain the shadow cache used to
    /// resolve locals of recursive invocations.
    pub shadow_cache: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            pointer_width: 0,
            max_resolve_depth: 64,
            shadow_cache: true,
        }
    }
}

impl ResolverConfig {
    /// The pointer width to use, falling back to the width recorded in
    /// the debug info when none is configured.
    pub fn effective_pointer_width(&self, from_debug_info: u8) -> u8 {
        if self.pointer_width != 0 {
            self.pointer_width
        } else {
            from_debug_info
        }
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VarScopeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            VarScopeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a configuration, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load resolver config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VarScopeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| VarScopeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            VarScopeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.pointer_width, 0);
        assert_eq!(config.effective_pointer_width(8), 8);
        assert!(config.shadow_cache);
    }

    #[test]
    fn test_explicit_pointer_width_wins() {
        let config = ResolverConfig {
            pointer_width: 4,
            ..Default::default()
        };
        assert_eq!(config.effective_pointer_width(8), 4);
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.toml");

        let config = ResolverConfig {
            pointer_width: 4,
            max_resolve_depth: 16,
            shadow_cache: false,
        };
        config.save(&path).unwrap();

        let loaded = ResolverConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let loaded = ResolverConfig::load_or_default("/nonexistent/resolver.toml");
        assert_eq!(loaded, ResolverConfig::default());
    }
}
