//! Disk is responsible for the file I/O of the torrent.
//!
//! The engine only decides what to persist, verified pieces are sent here
//! through an unbounded channel so that the engine never waits on the disk.
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, info};

use crate::{error::Error, metainfo::Info, utils::to_human_readable};

#[derive(Debug)]
pub enum DiskMsg {
    /// Write a verified piece, `offset` is the absolute offset of the first
    /// byte of the piece in the torrent.
    WritePiece { offset: u64, bytes: Bytes },
    Quit,
}

// A file of the torrent and where it begins, relative to the
// start of the torrent.
#[derive(Debug)]
struct DiskFile {
    path: PathBuf,
    start: u64,
    length: u64,
    file: File,
}

/// A contiguous part of a piece that belongs to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlice {
    /// Index of the file, in torrent order.
    pub file: usize,
    /// Where to write, relative to the start of the file.
    pub file_offset: u64,
    /// Where the slice begins, relative to the start of the piece.
    pub begin: usize,
    pub len: usize,
}

/// The Disk struct responsabilities:
/// - Create the files and directories of the torrent
/// - Write verified pieces to the files, spanning as many files as needed
#[derive(Debug)]
pub struct Disk {
    rx: mpsc::UnboundedReceiver<DiskMsg>,
    files: Vec<DiskFile>,
    total_size: u64,
    pieces: usize,
    pieces_written: usize,
}

impl Disk {
    /// Create the file tree of the torrent inside `download_dir` with every
    /// file pre-allocated with its final size.
    ///
    /// A single file torrent is written to `download_dir/name`, the files of
    /// a multi file torrent are written inside `download_dir/name/`.
    pub async fn new(
        rx: mpsc::UnboundedReceiver<DiskMsg>,
        download_dir: impl AsRef<Path>,
        info: &Info,
    ) -> Result<Self, Error> {
        let mut base = download_dir.as_ref().to_path_buf();
        if info.files.is_some() {
            base.push(&info.name);
        }

        let mut files = Vec::new();
        let mut start = 0;

        for meta_file in info.files() {
            if meta_file.path.is_empty() {
                continue;
            }

            let mut path = base.clone();
            path.extend(&meta_file.path);

            if let Some(dir) = path.parent() {
                create_dir_all(dir).await?;
            }

            let file = Self::open_file(&path).await?;
            file.set_len(meta_file.length).await?;

            files.push(DiskFile { path, start, length: meta_file.length, file });
            start += meta_file.length;
        }

        debug!("created {} files in {base:?}", files.len());

        Ok(Self {
            rx,
            files,
            total_size: start,
            pieces: info.pieces(),
            pieces_written: 0,
        })
    }

    /// Receive pieces until every piece of the torrent was written, until
    /// [`DiskMsg::Quit`], or until every sender is gone and nothing is left
    /// to receive.
    ///
    /// The writer does not watch the cancellation token. After
    /// [`PieceManager::stop`] it keeps waiting while the manager is alive,
    /// so the host must drop the manager, or send [`DiskMsg::Quit`] from a
    /// clone of the sender, for this to return.
    ///
    /// [`PieceManager::stop`]: crate::piece_manager::PieceManager::stop
    #[tracing::instrument(skip(self), name = "disk::run")]
    pub async fn run(&mut self) -> Result<(), Error> {
        debug!("disk started event loop");

        while self.pieces_written < self.pieces {
            let Some(msg) = self.rx.recv().await else {
                debug!("all senders dropped");
                break;
            };

            match msg {
                DiskMsg::WritePiece { offset, bytes } => {
                    self.write_piece(offset, &bytes).await?;
                }
                DiskMsg::Quit => {
                    debug!("Quit");
                    break;
                }
            }
        }

        for f in &self.files {
            f.file.sync_all().await?;
        }

        info!(
            "disk wrote {}/{} pieces",
            self.pieces_written, self.pieces
        );

        Ok(())
    }

    /// Write the bytes of a piece starting at the absolute `offset`.
    pub async fn write_piece(
        &mut self,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), Error> {
        if offset + bytes.len() as u64 > self.total_size {
            return Err(Error::OffsetOutOfBounds { offset, len: bytes.len() });
        }

        for slice in self.file_slices(offset, bytes.len()) {
            let f = &mut self.files[slice.file];

            f.file.seek(SeekFrom::Start(slice.file_offset)).await?;
            f.file.write_all(&bytes[slice.begin..slice.begin + slice.len]).await?;
            f.file.flush().await?;

            debug!("wrote {} bytes to {:?}", slice.len, f.path);
        }

        self.pieces_written += 1;
        debug!(
            "piece at {offset} written, {} in this piece",
            to_human_readable(bytes.len() as u64)
        );

        Ok(())
    }

    /// Split the range `offset..offset + len` of the torrent into the files
    /// that it covers. Empty files are skipped.
    pub fn file_slices(&self, offset: u64, len: usize) -> Vec<FileSlice> {
        let end = offset + len as u64;

        self.files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.length > 0)
            .filter(|(_, f)| f.start < end && offset < f.start + f.length)
            .map(|(i, f)| {
                let from = offset.max(f.start);
                let to = end.min(f.start + f.length);
                FileSlice {
                    file: i,
                    file_offset: from - f.start,
                    begin: (from - offset) as usize,
                    len: (to - from) as usize,
                }
            })
            .collect()
    }

    pub fn pieces_written(&self) -> usize {
        self.pieces_written
    }

    /// Open a file given a path, creating it if it doesn't exist.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<File, Error> {
        let path = path.as_ref();

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|_| Error::FileOpenError(path.to_string_lossy().into()))
    }
}
