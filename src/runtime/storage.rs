//! Filesystem layout helpers and atomic write operations
//!
//! Manages the `.courier/` directory holding the persisted runtime
//! configuration, and ensures atomic writes via temp files and renames.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::RuntimeConfig;
use super::error::{StorageError, StorageResult};

/// Name of the configuration file under the storage root
pub const CONFIG_FILE: &str = "config.json";

/// Storage manager for runtime persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let temp_path = path.with_extension("tmp");
        let failed = |detail: String| StorageError::AtomicWriteFailed {
            path: path.to_path_buf(),
            detail,
        };

        let mut file = File::create(&temp_path)
            .map_err(|err| failed(format!("create {:?}: {}", temp_path, err)))?;
        file.write_all(data)
            .map_err(|err| failed(format!("write: {}", err)))?;
        file.sync_all()
            .map_err(|err| failed(format!("sync: {}", err)))?;
        drop(file);

        fs::rename(&temp_path, path)
            .map_err(|err| failed(format!("rename {:?}: {}", temp_path, err)))?;

        // Sync parent directory so the rename itself is durable
        if let Some(parent) = path.parent() {
            let dir = OpenOptions::new().read(true).open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        if !path.exists() {
            return Err(StorageError::PathNotFound(path.to_path_buf()));
        }
        Ok(fs::read(path)?)
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        Ok(fs::create_dir_all(path)?)
    }
}

/// Initialize the storage directory for a new runtime
pub fn init_storage(root: &Path) -> StorageResult<()> {
    let storage = Storage::new(root.to_path_buf());
    storage.create_dir_all(root)
}

/// Write runtime configuration
pub fn write_config(config: &RuntimeConfig) -> StorageResult<()> {
    let storage = Storage::new(config.root.clone());
    let json = serde_json::to_vec_pretty(config)?;
    storage.write_atomic(&storage.config_path(), &json)
}

/// Load runtime configuration
pub fn load_config(root: &Path) -> StorageResult<RuntimeConfig> {
    let storage = Storage::new(root.to_path_buf());
    let data = storage.read_file(&storage.config_path())?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_storage() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested/.courier");

        init_storage(&root).unwrap();

        assert!(root.is_dir());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        init_storage(&root).unwrap();

        let config = RuntimeConfig {
            root: root.clone(),
            timeout_ms: 250,
            strict_add: true,
            debug: true,
            ..RuntimeConfig::default()
        };

        write_config(&config).unwrap();
        let loaded = load_config(&root).unwrap();

        assert_eq!(loaded.timeout_ms, 250);
        assert!(loaded.strict_add);
        assert!(loaded.debug);
        assert_eq!(loaded.max_depth, RuntimeConfig::default().max_depth);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILE), br#"{"timeout_ms": 10}"#).unwrap();

        let loaded = load_config(temp.path()).unwrap();
        assert_eq!(loaded.timeout_ms, 10);
        assert_eq!(loaded.cache_size, RuntimeConfig::default().cache_size);
    }

    #[test]
    fn test_missing_config() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load_config(temp.path()),
            Err(StorageError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_atomic_write() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let test_file = temp.path().join("test.dat");

        let data = b"Hello, world!";
        storage.write_atomic(&test_file, data).unwrap();

        let read_data = storage.read_file(&test_file).unwrap();
        assert_eq!(data, &read_data[..]);
        assert!(!temp.path().join("test.tmp").exists());
    }
}
