use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use common::{ArchiveError, Result};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// External media tools and derived files
    #[serde(default)]
    pub media: MediaConfig,

    /// Naming of recordings and seasons
    #[serde(default)]
    pub naming: NamingConfig,

    /// Reconciliation and file watching
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Debounced broadcast settings
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Default retention limits
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root folder for recorded VODs
    pub vod_root: PathBuf,

    /// Folder holding channels.json and keyvalue.json
    pub config_dir: PathBuf,

    /// Folder holding one VOD database file per channel
    pub vods_db: PathBuf,

    /// Destination for archived VODs
    pub saved_vods: PathBuf,

    /// Store each channel in its own sub folder
    pub channel_folders: bool,

    /// Store each VOD in its own sub folder
    pub vod_folders: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Target video container extension (no dot)
    pub vod_container: String,

    /// Target audio-only container extension (no dot)
    pub audio_container: String,

    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Capture program invoked for live streams
    pub streamlink_path: String,

    /// Write Kodi .nfo files on finalize
    pub create_kodi_nfo: bool,

    /// Generate a contact sheet on finalize
    pub contact_sheet: bool,

    /// Contact sheet tile layout, e.g. "4x4"
    pub contact_sheet_grid: String,

    /// Width of a single contact sheet tile in pixels
    pub contact_sheet_width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Name written into generated files
    pub app_name: String,

    /// chrono format string bucketing stream numbers into seasons
    pub season_format: String,

    /// Basename template, supports {login} {date} {id} {season} {episode}
    pub vod_basename: String,

    /// chrono format string used for {date}
    pub date_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Hard cap on reconciler passes per invocation
    pub max_fix_passes: u32,

    /// Let segment rebuilds adopt every media file in a VOD's own folder
    pub include_misnamed_files: bool,

    /// File watcher poll interval
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub watcher_poll_interval: Duration,

    /// Periodic reconciliation of every loaded VOD
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub reconcile_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Delay before a scheduled broadcast fires
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub debounce: Duration,

    /// Capacity of the outgoing broadcast channel
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// VODs kept per channel when the channel sets no limit
    pub vods_to_keep: u32,

    /// Storage per channel in GiB when the channel sets no limit
    pub storage_per_streamer_gb: u64,

    /// Chapters not longer than this (seconds) are dropped when a capture ends, 0 disables
    pub min_chapter_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vod_root: PathBuf::from("data/storage/vods"),
            config_dir: PathBuf::from("data/config"),
            vods_db: PathBuf::from("data/vods_db"),
            saved_vods: PathBuf::from("data/storage/saved_vods"),
            channel_folders: true,
            vod_folders: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            vod_container: "mp4".to_string(),
            audio_container: "m4a".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            streamlink_path: "streamlink".to_string(),
            create_kodi_nfo: false,
            contact_sheet: false,
            contact_sheet_grid: "4x4".to_string(),
            contact_sheet_width: 320,
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            app_name: "VodArchiver".to_string(),
            season_format: "%Y%m".to_string(),
            vod_basename: "{login}_{date}_{id}".to_string(),
            date_format: "%Y-%m-%dT%H_%M_%SZ".to_string(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_fix_passes: 10,
            include_misnamed_files: false,
            watcher_poll_interval: Duration::from_secs(2),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            channel_capacity: 256,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            vods_to_keep: 5,
            storage_per_streamer_gb: 100,
            min_chapter_duration: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Channel configuration list
    pub fn channels_config_path(&self) -> PathBuf {
        self.storage.config_dir.join("channels.json")
    }

    /// Persisted key-value store
    pub fn keyvalue_path(&self) -> PathBuf {
        self.storage.config_dir.join("keyvalue.json")
    }

    /// VOD database of one channel
    pub fn vods_db_path(&self, internal_name: &str) -> PathBuf {
        self.storage.vods_db.join(format!("{}.json", internal_name))
    }

    /// Folder holding a channel's recordings
    pub fn channel_folder(&self, internal_name: &str) -> PathBuf {
        if self.storage.channel_folders {
            self.storage.vod_root.join(internal_name)
        } else {
            self.storage.vod_root.clone()
        }
    }

    /// Whether a file name carries one of the accepted media extensions
    pub fn is_media_file(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.ends_with(&format!(".{}", self.media.vod_container.to_lowercase()))
            || lower.ends_with(&format!(".{}", self.media.audio_container.to_lowercase()))
    }
}

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file, writing defaults when it does not exist
    pub async fn load(&mut self) -> Result<()> {
        if !self.config_path.exists() {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path).await
            .map_err(|e| ArchiveError::ConfigurationError {
                message: format!("Failed to read config file: {}", e)
            })?;

        self.config = toml::from_str(&content)
            .map_err(|e| ArchiveError::ConfigurationError {
                message: format!("Failed to parse config file: {}", e)
            })?;

        self.validate()?;
        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| ArchiveError::ConfigurationError {
                message: format!("Failed to serialize config: {}", e)
            })?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await
                    .map_err(|e| ArchiveError::ConfigurationError {
                        message: format!("Failed to create config directory: {}", e)
                    })?;
            }
        }

        tokio::fs::write(&self.config_path, content).await
            .map_err(|e| ArchiveError::ConfigurationError {
                message: format!("Failed to write config file: {}", e)
            })?;

        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a mutable reference to the configuration
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Update configuration
    pub fn update_config(&mut self, config: AppConfig) -> Result<()> {
        self.config = config;
        self.validate()?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let media = &self.config.media;
        for (name, ext) in [("vod_container", &media.vod_container), ("audio_container", &media.audio_container)] {
            if ext.is_empty() || ext.contains('.') {
                return Err(ArchiveError::ConfigurationError {
                    message: format!("{} must be a bare extension, got '{}'", name, ext)
                });
            }
        }

        if !is_valid_date_format(&self.config.naming.season_format) {
            return Err(ArchiveError::ConfigurationError {
                message: format!("Invalid season format '{}'", self.config.naming.season_format)
            });
        }

        if !is_valid_date_format(&self.config.naming.date_format) {
            return Err(ArchiveError::ConfigurationError {
                message: format!("Invalid date format '{}'", self.config.naming.date_format)
            });
        }

        if self.config.naming.vod_basename.trim().is_empty() {
            return Err(ArchiveError::ConfigurationError {
                message: "VOD basename template cannot be empty".to_string()
            });
        }

        if self.config.reconcile.max_fix_passes == 0 {
            return Err(ArchiveError::ConfigurationError {
                message: "max_fix_passes must be greater than 0".to_string()
            });
        }

        if self.config.reconcile.watcher_poll_interval.is_zero() {
            return Err(ArchiveError::ConfigurationError {
                message: "Watcher poll interval must be greater than 0".to_string()
            });
        }

        if self.config.broadcast.channel_capacity == 0 {
            return Err(ArchiveError::ConfigurationError {
                message: "Broadcast channel capacity must be greater than 0".to_string()
            });
        }

        Ok(())
    }
}

fn is_valid_date_format(format: &str) -> bool {
    use chrono::format::{Item, StrftimeItems};
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    /// Apply environment variable overrides to configuration
    pub fn apply_overrides(config: &mut AppConfig) {
        use std::env;

        // Storage overrides
        if let Ok(root) = env::var("VOD_ARCHIVER_VOD_ROOT") {
            config.storage.vod_root = PathBuf::from(root);
        }
        if let Ok(dir) = env::var("VOD_ARCHIVER_CONFIG_DIR") {
            config.storage.config_dir = PathBuf::from(dir);
        }

        // Media overrides
        if let Ok(container) = env::var("VOD_ARCHIVER_VOD_CONTAINER") {
            config.media.vod_container = container;
        }
        if let Ok(path) = env::var("VOD_ARCHIVER_FFMPEG_PATH") {
            config.media.ffmpeg_path = path;
        }
        if let Ok(path) = env::var("VOD_ARCHIVER_FFPROBE_PATH") {
            config.media.ffprobe_path = path;
        }
        if let Ok(enabled) = env::var("VOD_ARCHIVER_CREATE_KODI_NFO") {
            config.media.create_kodi_nfo = enabled.to_lowercase() == "true";
        }

        // Logging overrides
        if let Ok(level) = env::var("VOD_ARCHIVER_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
