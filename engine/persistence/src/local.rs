//! Local file-based event store constructors

use crate::backend::LocalEventStore;
use crate::config::PersistenceConfig;
use crate::error::Result;

/// Open a local event store with default configuration
pub async fn open_local_store(data_dir: impl Into<std::path::PathBuf>) -> Result<LocalEventStore> {
    LocalEventStore::open(PersistenceConfig::new(data_dir)).await
}

/// Open a local event store with custom configuration
pub async fn open_local_store_with_config(config: PersistenceConfig) -> Result<LocalEventStore> {
    LocalEventStore::open(config).await
}
