use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::fares::DEFAULT_THRESHOLD_MINUTES;

/// Inputs and output location for a run.
///
/// Stored as a JSON file. Relative paths are taken from the directory holding
/// the config file:
/// ```json
/// {
///   "store_dir": "store",
///   "gtfs_feeds": ["gtfs/san-francisco-municipal-transportation-agency_20140111.zip"],
///   "avl_files": ["avl/sfmuni_2014_01.csv"],
///   "fare_files": ["clipper/2013_10.csv.gz"],
///   "transfer_threshold_minutes": 90
/// }
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub store_dir: PathBuf,
    #[serde(default)]
    pub gtfs_feeds: Vec<PathBuf>,
    #[serde(default)]
    pub avl_files: Vec<PathBuf>,
    #[serde(default)]
    pub fare_files: Vec<PathBuf>,
    #[serde(default = "default_threshold")]
    pub transfer_threshold_minutes: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD_MINUTES
}

impl Config {
    /// Loads the config from a JSON file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;

        if !(config.transfer_threshold_minutes > 0.0) {
            bail!(
                "transfer_threshold_minutes must be positive, got {}",
                config.transfer_threshold_minutes
            );
        }

        let base = path.parent().unwrap_or(Path::new(""));
        let config = config.relative_to(base);
        debug!(
            store_dir = %config.store_dir.display(),
            gtfs_feeds = config.gtfs_feeds.len(),
            avl_files = config.avl_files.len(),
            fare_files = config.fare_files.len(),
            "Loaded config"
        );
        Ok(config)
    }

    fn relative_to(self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        Self {
            store_dir: resolve(self.store_dir),
            gtfs_feeds: self.gtfs_feeds.into_iter().map(resolve).collect(),
            avl_files: self.avl_files.into_iter().map(resolve).collect(),
            fare_files: self.fare_files.into_iter().map(resolve).collect(),
            transfer_threshold_minutes: self.transfer_threshold_minutes,
        }
    }
}
