//! On-disk cache of PSD estimates.
//!
//! Records are bincode files named after the request that produced them;
//! the full key is stored alongside the values and checked on load.

use crate::psd::{Averaging, WindowFunction};
use crate::series::PowerSpectralDensity;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsdKey {
    pub detector: String,
    pub start: f64,
    pub end: f64,
    pub highpass: Option<f64>,
    pub segment_duration: f64,
    pub overlap: f64,
    pub window: WindowFunction,
    pub averaging: Averaging,
}

impl PsdKey {
    fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-hp{}-{}-{}-{:?}-{:?}.psd",
            self.detector,
            self.start,
            self.end,
            self.highpass.unwrap_or(0.0),
            self.segment_duration,
            self.overlap,
            self.window,
            self.averaging
        )
        .to_lowercase()
    }
}

#[derive(Serialize, Deserialize)]
struct PsdRecord {
    key: PsdKey,
    delta_f: f64,
    f0: f64,
    values: Vec<f64>,
}

pub struct PsdCache {
    dir: PathBuf,
}

impl PsdCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Cache under the platform cache directory.
    pub fn platform() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("org", "gwscan", "gwscan")
            .context("Could not determine project directories")?;
        Ok(Self::new(proj_dirs.cache_dir().join("psd")))
    }

    pub fn path(&self, key: &PsdKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// `Ok(None)` when nothing is cached for `key`.
    pub fn load(&self, key: &PsdKey) -> Result<Option<PowerSpectralDensity>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let mut f = File::open(&path)
            .with_context(|| format!("Failed to open cached PSD {}", path.display()))?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        let record: PsdRecord = bincode::deserialize(&buf)
            .with_context(|| format!("Corrupt cached PSD {}", path.display()))?;
        if record.key != *key {
            debug!("Cached PSD {} belongs to another request", path.display());
            return Ok(None);
        }
        info!("Loaded PSD from {}", path.display());
        let psd = PowerSpectralDensity::frequency(record.values, record.delta_f, record.f0)?;
        Ok(Some(psd))
    }

    pub fn store(&self, key: &PsdKey, psd: &PowerSpectralDensity) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;
        let record = PsdRecord {
            key: key.clone(),
            delta_f: psd.delta(),
            f0: psd.origin(),
            values: psd.data().to_vec(),
        };
        let bin = bincode::serialize(&record)?;
        let path = self.path(key);
        let mut f = File::create(&path)
            .with_context(|| format!("Failed to write cached PSD {}", path.display()))?;
        f.write_all(&bin)?;
        debug!("Cached PSD ({} bins) at {}", psd.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(detector: &str) -> PsdKey {
        PsdKey {
            detector: detector.to_string(),
            start: 1126259446.0,
            end: 1126259478.0,
            highpass: Some(15.0),
            segment_duration: 4.0,
            overlap: 0.5,
            window: WindowFunction::Hann,
            averaging: Averaging::Median,
        }
    }

    #[test]
    fn test_store_and_load() {
        let dir = std::env::temp_dir().join(format!("gwscan-cache-{}", std::process::id()));
        let cache = PsdCache::new(&dir);
        let psd = PowerSpectralDensity::frequency(vec![1e-46, 2e-46, 3e-46], 0.25, 0.0).unwrap();

        assert!(cache.load(&key("H1")).unwrap().is_none());
        cache.store(&key("H1"), &psd).unwrap();
        let loaded = cache.load(&key("H1")).unwrap().unwrap();
        assert_eq!(loaded.data(), psd.data());
        assert_eq!(loaded.delta(), 0.25);
        assert!(cache.load(&key("L1")).unwrap().is_none());

        let mut other = key("H1");
        other.averaging = Averaging::Mean;
        assert_ne!(cache.path(&other), cache.path(&key("H1")));
        assert!(cache.load(&other).unwrap().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
