use crate::config::TimelapseConfig;
use crate::error::{Result as LapsecamResult, StorageError};
use crate::recovery::SubsystemReset;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// File name derived from the capture time: `<epoch-seconds>.jpg`.
///
/// Two captures within the same second map to the same name; the later write
/// replaces the earlier file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampedFilename(i64);

impl TimestampedFilename {
    pub fn from_epoch_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.0
    }

    /// Parse a name produced by [`TimestampedFilename::file_name`]
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".jpg")?;
        if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok().map(Self)
    }

    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.0)
    }
}

impl fmt::Display for TimestampedFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.jpg", self.0)
    }
}

/// Capacity of the filesystem holding the timelapse directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Persistence target for timelapse frames
#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Write one frame in full. A failed write leaves no file behind.
    async fn persist(&self, name: &TimestampedFilename, data: &[u8]) -> Result<PathBuf, StorageError>;

    /// Re-check the medium and recreate the frame directory
    async fn remount(&self) -> Result<(), StorageError>;
}

/// Frames stored as individual files under `<mount>/<directory>`
pub struct DirectoryStore {
    mount_point: PathBuf,
    directory: PathBuf,
    require_mount: bool,
}

impl DirectoryStore {
    pub fn new(mount_point: impl Into<PathBuf>, directory: impl AsRef<Path>) -> Self {
        let mount_point = mount_point.into();
        let directory = mount_point.join(directory);
        Self {
            mount_point,
            directory,
            require_mount: true,
        }
    }

    pub fn from_config(config: &TimelapseConfig) -> Self {
        Self::new(&config.path, &config.directory).require_mount(config.require_mount)
    }

    /// Whether `prepare` insists on a separate filesystem at the mount point
    pub fn require_mount(mut self, require: bool) -> Self {
        self.require_mount = require;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Verify the medium is mounted and create the frame directory
    pub async fn prepare(&self) -> Result<Option<StorageInfo>, StorageError> {
        let unavailable = |source| StorageError::Unavailable {
            path: self.mount_point.display().to_string(),
            source,
        };

        let metadata = fs::metadata(&self.mount_point).await.map_err(unavailable)?;
        if !metadata.is_dir() {
            return Err(unavailable(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mount point is not a directory",
            )));
        }

        // Without the card the mount point is a plain directory on the root filesystem
        if self.require_mount && !is_mount_point(&self.mount_point).await.map_err(unavailable)? {
            return Err(unavailable(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no filesystem mounted",
            )));
        }

        if fs::metadata(&self.directory).await.is_err() {
            fs::create_dir_all(&self.directory).await.map_err(unavailable)?;
            info!("Created timelapse directory: {}", self.directory.display());
        }

        let info = self.storage_info();
        match info {
            Some(info) => info!(
                "Storage at {}: {} MB total, {} MB free",
                self.mount_point.display(),
                info.total_bytes / (1024 * 1024),
                info.free_bytes / (1024 * 1024)
            ),
            None => debug!(
                "No filesystem capacity reported for {}",
                self.mount_point.display()
            ),
        }

        Ok(info)
    }

    /// Frames already present in the directory, oldest first
    pub async fn list_frames(&self) -> Result<Vec<TimestampedFilename>, StorageError> {
        let read_err = |source| StorageError::Unavailable {
            path: self.directory.display().to_string(),
            source,
        };

        let mut entries = fs::read_dir(&self.directory).await.map_err(read_err)?;
        let mut frames = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            if let Some(name) = entry.file_name().to_str().and_then(TimestampedFilename::parse) {
                frames.push(name);
            }
        }

        frames.sort();
        Ok(frames)
    }

    /// Capacity of the filesystem holding the mount point
    pub fn storage_info(&self) -> Option<StorageInfo> {
        let path = std::fs::canonicalize(&self.mount_point).ok()?;
        let disks = Disks::new_with_refreshed_list();

        // The deepest mount containing the path owns it
        disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .map(|disk| StorageInfo {
                total_bytes: disk.total_space(),
                free_bytes: disk.available_space(),
            })
    }
}

#[async_trait]
impl FrameStore for DirectoryStore {
    async fn persist(&self, name: &TimestampedFilename, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.directory.join(name.file_name());
        let path_str = path.display().to_string();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|source| StorageError::Open {
                path: path_str.clone(),
                source,
            })?;

        let written = async {
            file.write_all(data).await?;
            file.sync_data().await
        }
        .await;
        drop(file);

        if let Err(source) = written {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove partial frame {}: {}", path_str, e);
            }
            return Err(StorageError::Write {
                path: path_str,
                source,
            });
        }

        debug!("Wrote {} bytes to {}", data.len(), path_str);
        Ok(path)
    }

    async fn remount(&self) -> Result<(), StorageError> {
        info!("Re-checking storage at {}", self.mount_point.display());
        self.prepare().await.map(|_| ())
    }
}

#[async_trait]
impl SubsystemReset for DirectoryStore {
    async fn reset(&self) -> LapsecamResult<()> {
        self.remount().await?;
        Ok(())
    }
}

/// True when `path` sits on a different device than its parent, or is the root
#[cfg(unix)]
async fn is_mount_point(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let path = fs::canonicalize(path).await?;
    let Some(parent) = path.parent() else {
        return Ok(true);
    };

    let own = fs::metadata(&path).await?;
    let above = fs::metadata(parent).await?;
    Ok(own.dev() != above.dev() || own.ino() == above.ino())
}

#[cfg(not(unix))]
async fn is_mount_point(_path: &Path) -> std::io::Result<bool> {
    Ok(true)
}
