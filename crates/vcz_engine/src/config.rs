use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::{io::SeekFrom, path::PathBuf};
use tokio::{
    fs::{create_dir_all, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::{block::BLOCK_LEN, error::Error};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where the files of the torrent are written.
    pub download_dir: String,

    /// Length of the blocks requested from peers.
    pub block_len: u32,

    /// How many pieces can be assembled in memory at the same time.
    pub buffer_capacity: usize,

    /// Seed of the generator that picks pieces for peers that have nothing
    /// new to download, the same seed gives the same picks.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|u| u.download_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(std::env::temp_dir)
            .to_string_lossy()
            .into_owned();

        Self { download_dir, block_len: BLOCK_LEN, buffer_capacity: 32, seed: 12345 }
    }
}

impl Config {
    /// Returns the path of the configuration file,
    /// creating the config folder if it doesn't exist.
    ///
    /// # Errors
    ///
    /// The fn will try to get the config dir from the users home dir.
    /// This fn can fail if the program does not have access to the path.
    pub async fn config_path() -> Result<PathBuf, Error> {
        // errors if the user does not have a home folder
        let dotfile =
            ProjectDirs::from("", "", "Vincenzo").ok_or(Error::HomeInvalid)?;
        let mut config_path = dotfile.config_dir().to_path_buf();

        // If the user has a home folder, but for some reason we cant open it
        if !config_path.exists() {
            create_dir_all(&config_path).await.map_err(|_| {
                Error::FolderOpenError(config_path.to_string_lossy().into())
            })?;
        }

        config_path.push("engine.toml");
        Ok(config_path)
    }

    /// Load the configuration file and transform it into Self.
    /// If the file does not exist, or is not valid, the default
    /// configuration is written to it.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_path().await?;

        // this will only fail if we dont have permission
        // to read or write to this path.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|_| Error::FileOpenError(path.to_string_lossy().into()))?;

        let mut dst = String::new();
        file.read_to_string(&mut dst).await?;

        match Self::from_toml(&dst) {
            Ok(config) if !dst.trim().is_empty() => Ok(config),
            r => {
                if let Err(e) = r {
                    warn!("invalid config at {path:?}, using the default: {e}");
                }
                let config = Config::default();

                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                file.write_all(toml::to_string(&config)?.as_bytes()).await?;
                file.flush().await?;
                debug!("wrote default config to {path:?}");

                Ok(config)
            }
        }
    }

    /// Parse and validate a configuration, missing fields are defaulted.
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.block_len == 0 {
            return Err(Error::ConfigError("block_len must be above 0".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::ConfigError(
                "buffer_capacity must be above 0".into(),
            ));
        }
        Ok(())
    }
}
