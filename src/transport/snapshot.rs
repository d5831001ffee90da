use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use crate::frame::Frame;
use crate::report::InspectionReport;

const FILE_PREFIX: &str = "defect_snapshot_";
const FILE_SUFFIX: &str = ".jpg";

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    /// Public base URL the directory is served under.
    pub image_base_url: Option<String>,
    /// Capture Normal reports too.
    pub always: bool,
    /// Keep at most this many snapshots; 0 keeps everything.
    pub max_files: usize,
    pub jpeg_quality: u8,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("snapshots"),
            image_base_url: None,
            always: false,
            max_files: 500,
            jpeg_quality: 85,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub url: Option<String>,
}

/// Writes annotated frames for downstream consumers to fetch by URL.
pub struct SnapshotStore {
    config: SnapshotConfig,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("create snapshot dir {}", config.dir.display()))?;
        Ok(Self { config })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn should_capture(&self, report: &InspectionReport) -> bool {
        self.config.always || !report.is_normal()
    }

    /// Encode and write `frame`, then prune old snapshots.
    ///
    /// Files are named `defect_snapshot_<YYYYmmdd_HHMMSS>.jpg`; a `_<n>` suffix is
    /// added when a snapshot for the same second already exists. Writes go to a
    /// temporary name first so readers never see a partial file.
    pub fn save(&self, frame: &Frame, detection_time: NaiveDateTime) -> Result<Snapshot> {
        let jpeg = frame.to_jpeg(self.config.jpeg_quality)?;
        let stamp = detection_time.format("%Y%m%d_%H%M%S").to_string();
        let filename = self.unused_name(&stamp);
        let path = self.config.dir.join(&filename);
        let tmp = self.config.dir.join(format!(".{}.tmp", filename));
        std::fs::write(&tmp, &jpeg).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
        log::info!("snapshot saved to {}", path.display());

        if let Err(err) = self.prune() {
            log::warn!("snapshot pruning failed: {:#}", err);
        }

        let url = self
            .config
            .image_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), filename));
        Ok(Snapshot { path, url })
    }

    fn unused_name(&self, stamp: &str) -> String {
        let base = format!("{}{}{}", FILE_PREFIX, stamp, FILE_SUFFIX);
        if !self.config.dir.join(&base).exists() {
            return base;
        }
        (1u32..)
            .map(|n| format!("{}{}_{}{}", FILE_PREFIX, stamp, n, FILE_SUFFIX))
            .find(|name| !self.config.dir.join(name).exists())
            .unwrap_or(base)
    }

    /// Snapshot file names, oldest first.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.config.dir)
            .with_context(|| format!("read snapshot dir {}", self.config.dir.display()))?
        {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn prune(&self) -> Result<()> {
        if self.config.max_files == 0 {
            return Ok(());
        }
        let names = self.list()?;
        let excess = names.len().saturating_sub(self.config.max_files);
        for name in &names[..excess] {
            let path = self.config.dir.join(name);
            std::fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            log::debug!("removed old snapshot {}", path.display());
        }
        Ok(())
    }
}
