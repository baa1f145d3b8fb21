// Helpers shared by the snapshot-file stores.

use crate::core::storage::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Serialize to a sibling temp file, then rename over the original, so a
/// crash mid-write never leaves a truncated document behind.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot document, creating the file with an empty-but-valid
/// document when it does not exist yet. Unreadable content falls back to the
/// empty document rather than refusing to start.
pub fn load_or_init<T>(path: &Path) -> Result<T, StorageError>
where
    T: Serialize + DeserializeOwned + Default,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file)).unwrap_or_default())
    } else {
        let value = T::default();
        write_snapshot(path, &value)?;
        Ok(value)
    }
}
