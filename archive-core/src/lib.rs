pub mod serde_helpers;
pub mod config;
pub mod keyvalue;
pub mod jobs;
pub mod media;
pub mod watcher;
pub mod broadcast;
pub mod gateway;
pub mod context;
pub mod vod;
#[cfg(test)]
mod vod_test;
pub mod reconcile;
pub mod channel;
pub mod registry;
pub mod archive;
#[cfg(test)]
mod archive_test;
pub mod coordinator;
#[cfg(test)]
mod testing;

pub use archive::Archive;
pub use channel::{Channel, ChannelConfig};
pub use config::{AppConfig, ConfigManager, EnvConfigOverride};
pub use context::{Services, VodContext};
pub use coordinator::{ArchiveEvent, ArchiveHandle, Command, Coordinator};
pub use reconcile::{fix_issues, reconcile_vod, FixIssue};
pub use registry::Registry;
pub use vod::Vod;
