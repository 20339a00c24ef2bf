//! Store and page cache configuration
//!
//! Values resolve with the priority environment > config file > defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default page size in bytes (8KB)
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Default number of freed ids pulled into the allocation batch at once
pub const DEFAULT_GRAB_SIZE: usize = 1024;

/// Default number of page frames per mapped file
pub const DEFAULT_MAX_PAGES: usize = 1024;

/// Per-store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Page size used when mapping the store file
    pub page_size: usize,
    /// Batch size for handing out reclaimed ids
    pub grab_size: usize,
    /// When false, a store whose id file was lost or dirty rebuilds the
    /// free list by scanning every record after open
    pub rebuild_id_generators_fast: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            grab_size: DEFAULT_GRAB_SIZE,
            rebuild_id_generators_fast: true,
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the id grab size
    pub fn with_grab_size(mut self, grab_size: usize) -> Self {
        self.grab_size = grab_size;
        self
    }

    /// Select fast (scan for high id only) or full id generator rebuilds
    pub fn with_rebuild_id_generators_fast(mut self, fast: bool) -> Self {
        self.rebuild_id_generators_fast = fast;
        self
    }

    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded store configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    /// Apply `NEXUS_STORE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("NEXUS_STORE_PAGE_SIZE") {
            self.page_size = value
                .parse()
                .map_err(|_| Error::config(format!("NEXUS_STORE_PAGE_SIZE: '{}'", value)))?;
        }

        if let Ok(value) = std::env::var("NEXUS_STORE_GRAB_SIZE") {
            self.grab_size = value
                .parse()
                .map_err(|_| Error::config(format!("NEXUS_STORE_GRAB_SIZE: '{}'", value)))?;
        }

        if let Ok(value) = std::env::var("NEXUS_STORE_REBUILD_IDS_FAST") {
            self.rebuild_id_generators_fast = value.parse().map_err(|_| {
                Error::config(format!("NEXUS_STORE_REBUILD_IDS_FAST: '{}'", value))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::config("page_size must be > 0"));
        }
        if self.grab_size == 0 {
            return Err(Error::config("grab_size must be > 0"));
        }
        Ok(())
    }
}

/// Page cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageCacheConfig {
    /// Largest page size the cache accepts
    pub max_page_size: usize,
    /// Maximum number of resident pages per mapped file
    pub max_pages: usize,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            max_page_size: 1024 * 1024,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl PageCacheConfig {
    /// Set the number of frames per mapped file
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(Error::config("max_pages must be > 0"));
        }
        if self.max_page_size == 0 {
            return Err(Error::config("max_page_size must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.grab_size, 1024);
        assert!(config.rebuild_id_generators_fast);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new()
            .with_page_size(32)
            .with_grab_size(4)
            .with_rebuild_id_generators_fast(false);
        assert_eq!(config.page_size, 32);
        assert_eq!(config.grab_size, 4);
        assert!(!config.rebuild_id_generators_fast);
    }

    #[test]
    fn test_toml_file_with_partial_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "page_size = 4096\n").unwrap();

        let config = StoreConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.grab_size, DEFAULT_GRAB_SIZE);
    }

    #[test]
    fn test_toml_file_rejects_zero_page_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "page_size = 0\n").unwrap();

        let result = StoreConfig::from_toml_file(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_file_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "page_size = \"big\"\n").unwrap();

        assert!(StoreConfig::from_toml_file(&path).is_err());
    }

    #[test]
    fn test_page_cache_config_validation() {
        assert!(PageCacheConfig::default().validate().is_ok());
        assert!(
            PageCacheConfig::default()
                .with_max_pages(0)
                .validate()
                .is_err()
        );
    }
}
