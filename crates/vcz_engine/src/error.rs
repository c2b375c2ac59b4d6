use std::io;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::disk::DiskMsg;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("Error while trying to read the configuration: `{0}`")]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("Error while trying to write the configuration: `{0}`")]
    ConfigSerializeError(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Could not open the file `{0}`. Please make sure the program has \
         permission to access it"
    )]
    FileOpenError(String),

    #[error("The torrent info is not valid: {0}")]
    InfoInvalid(String),

    #[error("Tried to write {len} bytes at offset {offset}, past the end of the torrent")]
    OffsetOutOfBounds { offset: u64, len: usize },

    #[error("Could not send message to Disk")]
    SendErrorDisk(#[from] mpsc::error::SendError<DiskMsg>),
}
