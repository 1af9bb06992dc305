//! Cache configuration and store location

use crate::buffer::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the store location
pub const CACHE_DIR_ENV: &str = "OUTCACHE_DIR";

/// Layout of the store this build of the crate reads and writes
pub const CURRENT_LAYOUT_VERSION: u32 = 1;

/// Settings for a [`LocalBuildCache`](crate::LocalBuildCache) and the
/// buffers feeding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Store directory; resolved from the environment when unset
    pub root: Option<PathBuf>,
    /// Layout version expected in the store tag
    pub layout_version: u32,
    /// First chunk size of stream buffers
    pub initial_chunk_size: usize,
    /// Upper bound for stream buffer chunk growth
    pub max_chunk_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            layout_version: CURRENT_LAYOUT_VERSION,
            initial_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

impl CacheConfig {
    /// Parse a TOML document, filling omitted keys with defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::configuration(format!("Invalid cache configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the chunk sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.initial_chunk_size == 0 {
            return Err(Error::configuration("initial-chunk-size must be positive"));
        }
        if self.max_chunk_size < self.initial_chunk_size {
            return Err(Error::configuration(format!(
                "max-chunk-size ({}) must not be below initial-chunk-size ({})",
                self.max_chunk_size, self.initial_chunk_size
            )));
        }
        Ok(())
    }

    /// The store directory: the configured root, else the first writable
    /// default location
    pub fn resolve_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        cache_root_from_inputs(RootInputs {
            override_dir: std::env::var(CACHE_DIR_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            xdg_cache_home: std::env::var("XDG_CACHE_HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        })
    }
}

#[derive(Debug, Clone)]
struct RootInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: RootInputs) -> Result<PathBuf> {
    // First writable wins:
    // OUTCACHE_DIR, XDG_CACHE_HOME/outcache, OS cache dir/outcache,
    // ~/.outcache/cache, TMPDIR/outcache/cache
    let mut candidates = Vec::new();
    if let Some(dir) = inputs.override_dir {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("outcache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("outcache"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".outcache/cache"));
    }
    candidates.push(inputs.temp_dir.join("outcache/cache"));

    for path in candidates {
        // Nix build sandboxes point HOME here and it is never writable
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if is_writable_dir(&path) {
            return Ok(path);
        }
        tracing::debug!(candidate = %path.display(), "Cache directory not writable, trying next");
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn is_writable_dir(path: &Path) -> bool {
    if std::fs::create_dir_all(path).is_err() {
        return false;
    }
    let probe = path.join(".write_probe");
    match std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.root, None);
        assert_eq!(config.layout_version, CURRENT_LAYOUT_VERSION);
        assert_eq!(config.initial_chunk_size, 4096);
        assert_eq!(config.max_chunk_size, 1024 * 1024);
    }

    #[test]
    fn parses_partial_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            root = "/var/cache/outcache"
            layout-version = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/var/cache/outcache")));
        assert_eq!(config.layout_version, 3);
        assert_eq!(config.initial_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn rejects_inverted_chunk_sizes() {
        let err = CacheConfig::from_toml_str(
            r"
            initial-chunk-size = 8192
            max-chunk-size = 1024
            ",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max-chunk-size"));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(CacheConfig::from_toml_str("layout-version = \"two\"").is_err());
    }

    #[test]
    fn explicit_root_wins() {
        let config = CacheConfig {
            root: Some(PathBuf::from("/somewhere")),
            ..CacheConfig::default()
        };
        assert_eq!(config.resolve_root().unwrap(), PathBuf::from("/somewhere"));
    }

    #[test]
    fn resolution_skips_homeless_shelter() {
        let tmp = TempDir::new().unwrap();
        let dir = cache_root_from_inputs(RootInputs {
            override_dir: None,
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            os_cache_dir: None,
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
        })
        .unwrap();
        assert!(!dir.starts_with("/homeless-shelter"));
        assert_eq!(dir, tmp.path().join("outcache/cache"));
    }

    #[test]
    fn resolution_prefers_override() {
        let tmp = TempDir::new().unwrap();
        let wanted = tmp.path().join("override");
        let dir = cache_root_from_inputs(RootInputs {
            override_dir: Some(wanted.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(dir, wanted);
        assert!(wanted.is_dir());
    }
}
