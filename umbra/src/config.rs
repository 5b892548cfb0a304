use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::region_lock::LockSemantics;

/// Options for opening image planes. Loadable from YAML or JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Admission rule used by every image's region lock.
    pub lock_semantics: LockSemantics,
    /// HDU to open, 0 being the primary HDU.
    pub image_number: usize,
    /// Open backing files for writing.
    pub writable: bool,
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let config: StoreConfig = common::config_format::load_config(path)?;
        if config.lock_semantics == LockSemantics::Legacy {
            tracing::warn!(
                "{}: legacy lock semantics let reads overlap active writes",
                path.display()
            );
        }
        Ok(config)
    }
}
