//! Configuration: persisted `SyncConfig`, its manager, and on-disk locations.

pub mod dynamic;
pub mod manager;
pub mod paths;

pub use dynamic::SyncConfig;
pub use manager::ConfigManager;
pub use paths::AppPaths;
