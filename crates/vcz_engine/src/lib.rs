//! The piece acquisition engine of Vincenzo, a BitTorrent client.
//!
//! Peer sessions ask the [`piece_manager::PieceManager`] which block to
//! request next and hand back the blocks they receive. Pieces are assembled
//! in a bounded [`buffer::Buffer`], verified against their SHA1 hash, and
//! sent to the [`disk::Disk`] to be written.
//!
//! The wire protocol, trackers, and the parsing of .torrent files are not
//! part of this crate: a torrent is described with an already decoded
//! [`metainfo::Info`].
//!
//! # Example
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use vcz_engine::{
//!     bitfield::{Bitfield, VczBitfield},
//!     config::Config,
//!     disk::Disk,
//!     error::Error,
//!     metainfo::Info,
//!     piece_manager::{PeerId, PieceManager},
//! };
//!
//! # async fn download(info: Info) -> Result<(), Error> {
//! let config = Config::load().await?;
//! let (disk_tx, disk_rx) = mpsc::unbounded_channel();
//!
//! let mut disk = Disk::new(disk_rx, &config.download_dir, &info).await?;
//! let manager =
//!     PieceManager::new(&info, &config, disk_tx, CancellationToken::new())?;
//!
//! let disk_handle = tokio::spawn(async move { disk.run().await });
//!
//! // a peer session registers what the peer has,
//! let peer = PeerId(0);
//! manager.update_piece_frequencies(peer, Bitfield::from_piece(info.pieces()));
//!
//! // and loops while there is something to download.
//! while manager.continue_download() {
//!     let Some(request) = manager.select_next_block(peer) else { break };
//!     // send `request` to the peer and give the block to `add_block`.
//! #   let _ = request;
//! }
//!
//! manager.remove_peer(peer);
//! drop(manager);
//! let _ = disk_handle.await;
//! # Ok(())
//! # }
//! ```

pub mod bitfield;
pub mod block;
pub mod buffer;
pub mod config;
pub mod counter;
pub mod disk;
pub mod error;
pub mod metainfo;
pub mod piece;
pub mod piece_manager;
pub mod utils;
