use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // /opt/pulse-bridge => /opt/pulse-bridge.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to pulse-bridge.json in an os dependent standard directory, such as ~/.config on linux.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "pulse-bridge", "pulse-bridge").map(|dirs| {
        dirs.config_dir().join("pulse-bridge.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    let portable = get_portable_config_path();
    if let Some(path) = portable {
        let attr = std::fs::metadata(&path);
        match attr {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("Could not read metadata of: {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }

    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        ConfigIO::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        // the same file is used for the single instance lock, see locker()
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let config_io = ConfigIO::open(&dir.path().join("pulse-bridge.json")).unwrap();

        assert_eq!(config_io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn saved_config_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let config_io = ConfigIO::open(&dir.path().join("nested").join("pulse-bridge.json")).unwrap();
        let config = Config { peer_address: "192.168.1.20:5000".to_string(), ppg: false, ..Config::default() };

        config_io.save(&config).await.unwrap();
        assert_eq!(config_io.read().await.unwrap(), config);
    }

    #[tokio::test]
    async fn malformed_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulse-bridge.json");
        std::fs::write(&path, "{not json").unwrap();

        let config_io = ConfigIO::open(&path).unwrap();
        assert!(matches!(config_io.read().await, Err(ConfigError::JsonError { .. })));
    }
}
