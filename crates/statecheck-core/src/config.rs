//! Core configuration options.
//!
//! The configuration loader itself lives outside the core; it hands us
//! `(key, value)` pairs which [`CoreConfig::from_properties`] understands.

use crate::allocation::AllocationContextKind;
use crate::choice::RandomizePolicy;
use crate::error::CoreError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where restorable snapshots keep their path and last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffloadPolicy {
    /// Keep the stored forms in memory.
    Memory,
    /// Write them to a per-snapshot file, rehydrated on first access.
    File,
}

/// Configuration of the exploration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application name, used as a directory component for snapshot storage.
    pub app_name: String,
    /// Allocation context variant, fixed for the whole search.
    pub allocation_context: AllocationContextKind,
    /// Visitation order policy for choice generators.
    pub cg_randomize: RandomizePolicy,
    /// Seed of the PRNG that seeds randomized choice generators.
    pub cg_seed: u64,
    /// Override for the snapshot directory.
    pub storage_dir: Option<PathBuf>,
    /// Whether snapshots are offloaded to files.
    pub offload: OffloadPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "statecheck".to_string(),
            allocation_context: AllocationContextKind::Hashed,
            cg_randomize: RandomizePolicy::Sequential,
            cg_seed: 42,
            storage_dir: None,
            offload: OffloadPolicy::File,
        }
    }
}

impl CoreConfig {
    /// Build a configuration from textual options, starting from the defaults.
    ///
    /// Unknown keys are ignored so the same property set can be shared with
    /// other collaborators.
    pub fn from_properties<'a, I>(props: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in props {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Apply a single textual option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        let value = value.trim();
        let invalid = || CoreError::Config {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "allocation.context" => {
                self.allocation_context = match value {
                    "hashed" => AllocationContextKind::Hashed,
                    "precise" => AllocationContextKind::Precise,
                    _ => return Err(invalid()),
                }
            }
            "cg.randomize" => {
                self.cg_randomize = match value {
                    "none" => RandomizePolicy::Sequential,
                    "permute" => RandomizePolicy::RandomizeOnce,
                    "seeded" => RandomizePolicy::RandomEachRun,
                    _ => return Err(invalid()),
                }
            }
            "cg.seed" => self.cg_seed = value.parse().map_err(|_| invalid())?,
            "state.storage.dir" => self.storage_dir = Some(PathBuf::from(value)),
            "state.storage.offload" => {
                self.offload = match value {
                    "file" => OffloadPolicy::File,
                    "memory" => OffloadPolicy::Memory,
                    _ => return Err(invalid()),
                }
            }
            "app.name" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                self.app_name = value.to_string();
            }
            _ => debug!("ignoring unknown option `{}`", key),
        }
        Ok(())
    }

    /// The snapshot directory: the override, or `<tmp>/<app_name>/storage`.
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(&self.app_name).join("storage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.allocation_context, AllocationContextKind::Hashed);
        assert_eq!(config.cg_randomize, RandomizePolicy::Sequential);
        assert_eq!(config.offload, OffloadPolicy::File);
        assert!(config.storage_dir().ends_with("statecheck/storage"));
    }

    #[test]
    fn parses_all_options() {
        let config = CoreConfig::from_properties([
            ("allocation.context", "precise"),
            ("cg.randomize", "seeded"),
            ("cg.seed", "1234"),
            ("state.storage.dir", "/var/tmp/snaps"),
            ("state.storage.offload", "memory"),
        ])
        .unwrap();

        assert_eq!(config.allocation_context, AllocationContextKind::Precise);
        assert_eq!(config.cg_randomize, RandomizePolicy::RandomEachRun);
        assert_eq!(config.cg_seed, 1234);
        assert_eq!(config.storage_dir(), PathBuf::from("/var/tmp/snaps"));
        assert_eq!(config.offload, OffloadPolicy::Memory);
    }

    #[test]
    fn permute_maps_to_randomize_once() {
        let config = CoreConfig::from_properties([("cg.randomize", "permute")]).unwrap();
        assert_eq!(config.cg_randomize, RandomizePolicy::RandomizeOnce);
    }

    #[test]
    fn rejects_bad_values() {
        let err = CoreConfig::from_properties([("cg.seed", "forty-two")]).unwrap_err();
        assert!(matches!(err, CoreError::Config { ref key, .. } if key == "cg.seed"));

        assert!(CoreConfig::from_properties([("allocation.context", "fuzzy")]).is_err());
    }

    #[test]
    fn ignores_unknown_keys() {
        let config = CoreConfig::from_properties([("search.depth_limit", "10")]).unwrap();
        assert_eq!(config.cg_seed, 42);
    }

    #[test]
    fn app_name_changes_storage_dir() {
        let config = CoreConfig::from_properties([("app.name", "bank")]).unwrap();
        assert!(config.storage_dir().ends_with("bank/storage"));
    }
}
