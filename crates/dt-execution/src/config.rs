// config.rs — Engine configuration.
//
// DistConfig determines where the engine stores its state: execution and
// delivery records, issue records, seeded schedules, and the audit trail.
// `for_data_dir()` generates the standard layout under a `.dt/` directory;
// `load()` additionally honors an optional `dt.toml` site file next to it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Configuration for the distribution tracking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistConfig {
    /// Root directory for engine state.
    pub data_root: PathBuf,

    /// Directory for Execution records (one JSON file per run).
    pub executions_dir: PathBuf,

    /// Directory for Delivery records.
    pub deliveries_dir: PathBuf,

    /// Directory for Issue records.
    pub issues_dir: PathBuf,

    /// Directory for the file-backed schedule provider.
    pub schedules_dir: PathBuf,

    /// Path to the append-only audit trail.
    pub audit_log: PathBuf,

    /// Actor recorded for mutations when the caller supplies none.
    pub default_actor: String,
}

/// Shape of the optional `dt.toml` site file.
#[derive(Debug, Default, Deserialize)]
struct SiteFile {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    identity: IdentitySection,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentitySection {
    default_actor: Option<String>,
}

impl DistConfig {
    /// Create a config with the standard `.dt/` layout under a root.
    pub fn for_data_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let dt_dir = root.join(".dt");
        Self {
            executions_dir: dt_dir.join("executions"),
            deliveries_dir: dt_dir.join("deliveries"),
            issues_dir: dt_dir.join("issues"),
            schedules_dir: dt_dir.join("schedules"),
            audit_log: dt_dir.join("audit.jsonl"),
            default_actor: "operator".to_string(),
            data_root: dt_dir,
        }
    }

    /// Create a config for a root, honoring `<root>/dt.toml` if present.
    ///
    /// The site file can redirect storage and set the default actor:
    ///
    /// ```toml
    /// [storage]
    /// data_dir = "/var/lib/disttrack"
    ///
    /// [identity]
    /// default_actor = "sppg-bandung-01"
    /// ```
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let root = root.as_ref();
        let site_path = root.join("dt.toml");

        let site: SiteFile = if site_path.exists() {
            let raw = fs::read_to_string(&site_path).map_err(|source| ExecutionError::Io {
                path: site_path.display().to_string(),
                source,
            })?;
            toml::from_str(&raw).map_err(|e| ExecutionError::Config {
                path: site_path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            SiteFile::default()
        };

        let mut config = match site.storage.data_dir {
            Some(dir) => Self::for_data_dir(dir),
            None => Self::for_data_dir(root),
        };
        if let Some(actor) = site.identity.default_actor {
            config.default_actor = actor;
        }
        Ok(config)
    }
}
