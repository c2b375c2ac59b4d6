//! Decides which block of which piece each peer downloads next, and absorbs
//! the blocks that peers send back.
//!
//! Peer sessions run concurrently and all of them call into the same
//! [`PieceManager`]. Every piece of mutable state lives in one [`State`]
//! guarded by one lock, which is only held for the duration of a single
//! call and never across I/O.
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use hashbrown::HashMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, VczBitfield},
    block::{Block, BlockInfo},
    buffer::Buffer,
    config::Config,
    counter::Counter,
    disk::DiskMsg,
    error::Error,
    metainfo::Info,
    piece::{PieceMetadata, PieceState},
    utils::{percentage, to_human_readable},
};

/// Identifier of a connected peer, assigned by whoever owns the sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u32);

impl From<u32> for PeerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A snapshot of the progress of the download.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub completed: usize,
    pub total: usize,
    /// Peers with a registered bitfield.
    pub peers: usize,
    /// Pieces being assembled in the buffer.
    pub buffered: usize,
    /// Bytes accepted from peers, including the ones of corrupted pieces.
    pub downloaded: u64,
    /// Bytes per second.
    pub download_rate: u64,
}

#[derive(Debug)]
struct State {
    pieces: Vec<PieceMetadata>,
    buffer: Buffer,
    bitfields: HashMap<PeerId, Bitfield>,
    /// The piece that a peer is focused on. The piece is always in the
    /// buffer and always in the bitfield of the peer.
    affinity: HashMap<PeerId, usize>,
    rng: StdRng,
}

impl State {
    /// Forget every affinity that points to `piece`.
    fn clear_affinity(&mut self, piece: usize) {
        self.affinity.retain(|_, p| *p != piece);
    }
}

#[derive(Debug)]
pub struct PieceManager {
    state: Mutex<State>,
    disk_tx: mpsc::UnboundedSender<DiskMsg>,
    token: CancellationToken,
    counter: Counter,
    completed: AtomicUsize,
    total: usize,
    piece_length: u32,
    block_len: u32,
}

impl PieceManager {
    /// Create the manager of the torrent described by `info`, verified pieces
    /// are sent to `disk_tx`. Cancelling `token` stops the download.
    pub fn new(
        info: &Info,
        config: &Config,
        disk_tx: mpsc::UnboundedSender<DiskMsg>,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        info.validate()?;
        config.validate()?;

        let block_len = config.block_len;
        let total = info.pieces();

        let pieces = (0..total)
            .map(|i| {
                PieceMetadata::new(
                    info.piece_hash(i).unwrap_or_default(),
                    info.piece_size(i),
                    block_len,
                )
            })
            .collect();

        let state = State {
            pieces,
            buffer: Buffer::new(
                config.buffer_capacity,
                block_len,
                info.piece_length,
            ),
            bitfields: HashMap::new(),
            affinity: HashMap::new(),
            rng: StdRng::seed_from_u64(config.seed),
        };

        debug!(
            "{total} pieces of {}, {} buffer slots",
            to_human_readable(info.piece_length as u64),
            config.buffer_capacity
        );

        Ok(Self {
            state: Mutex::new(state),
            disk_tx,
            token,
            counter: Counter::new(),
            completed: AtomicUsize::new(0),
            total,
            piece_length: info.piece_length,
            block_len,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next block that `peer` should request, or `None` if there is
    /// nothing for this peer to do right now.
    ///
    /// In order, the peer is sent to:
    /// 1. The piece it is already focused on.
    /// 2. If the buffer has room, the first piece that nobody started and
    ///    that the peer has.
    /// 3. A random piece of the buffer that the peer has. If every block of
    ///    that piece was already requested, the pending requests are
    ///    forgotten and the piece is requested again.
    pub fn select_next_block(&self, peer: PeerId) -> Option<BlockInfo> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let bitfield = state.bitfields.get(&peer)?;

        let mut chosen = state.affinity.get(&peer).copied();

        if chosen.is_none() && !state.buffer.is_full() {
            chosen = state
                .pieces
                .iter()
                .enumerate()
                .find(|(i, p)| p.state == PieceState::NotStarted && bitfield.has(*i))
                .map(|(i, _)| i);

            if let Some(i) = chosen {
                let piece = &mut state.pieces[i];
                state.buffer.add_piece(i, piece.num_blocks, piece.length);
                piece.state = PieceState::Buffered;
                state.affinity.insert(peer, i);
                debug!("{peer} started piece {i}");
            }
        }

        if chosen.is_none() {
            let buffered = state.buffer.pieces_in_buffer();

            if !buffered.is_empty() {
                let start = state.rng.gen_range(0..buffered.len());
                chosen = (0..buffered.len())
                    .map(|k| buffered[(start + k) % buffered.len()])
                    .find(|p| bitfield.has(*p));
            }

            if let Some(i) = chosen {
                state.affinity.insert(peer, i);

                if state.pieces[i].state == PieceState::AllRequested {
                    state.buffer.clear_requested(i);
                    state.pieces[i].state = PieceState::Buffered;
                    debug!("{peer} re-opened piece {i}");
                }
            }
        }

        let piece = chosen?;
        let (all_requested, block) = state.buffer.next_block_to_request(piece);

        if all_requested {
            state.pieces[piece].state = PieceState::AllRequested;
            state.clear_affinity(piece);
        }

        let block = block?;
        let len = state.pieces[piece].block_len(block, self.block_len);

        Some(BlockInfo::new(piece, block * self.block_len, len))
    }

    /// Absorb a block sent by `peer`.
    ///
    /// Blocks whose offset or length is not the one of a block of their
    /// piece, and blocks that were already downloaded, are dropped. When the block completes its piece the piece
    /// is verified: a valid piece is sent to the disk, a corrupted one is
    /// downloaded again from scratch.
    pub fn add_block(&self, peer: PeerId, block: Block) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let index = block.index;

        let Some(piece) = state.pieces.get(index) else {
            debug!("{peer} sent a block of unknown piece {index}");
            return;
        };

        let info = BlockInfo::from(&block);
        let begin = info.begin;
        let len = block.block.len();

        // a block must be exactly the block that was requested at `begin`
        if begin >= piece.length
            || begin % self.block_len != 0
            || len
                != piece.block_len(info.block_index(self.block_len), self.block_len)
                    as usize
        {
            debug!("{peer} sent invalid block {info:?}");
            return;
        }

        if !state.buffer.should_accept_block(index, begin) {
            debug!("{peer} sent unneeded block {index} {begin}");
            return;
        }

        let (completed, bytes) = state.buffer.write_block(&block);
        self.counter.record_download(len as u64);

        if !completed {
            return;
        }

        if state.pieces[index].hash.verify(bytes) {
            let bytes = Bytes::copy_from_slice(bytes);
            state.pieces[index].state = PieceState::Completed;
            let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

            info!("piece {index} verified, {completed}/{}", self.total);

            let offset = index as u64 * self.piece_length as u64;
            if let Err(e) =
                self.disk_tx.send(DiskMsg::WritePiece { offset, bytes })
            {
                warn!("{}, stopping the download", Error::from(e));
                self.token.cancel();
            }
        } else {
            warn!("piece {index} is corrupted, downloading it again");
            state.pieces[index].state = PieceState::NotStarted;
        }

        state.buffer.remove_piece(index);
        state.clear_affinity(index);
    }

    /// Store the bitfield of `peer`, replacing the previous one.
    pub fn update_piece_frequencies(&self, peer: PeerId, bitfield: Bitfield) {
        debug_assert_eq!(
            bitfield.len(),
            self.total,
            "bitfield of {peer} does not match the number of pieces"
        );

        let mut bitfield = bitfield;
        bitfield.resize(self.total, false);

        let mut state = self.lock();

        if let Some(p) = state.affinity.get(&peer).copied() {
            if !bitfield.has(p) {
                state.affinity.remove(&peer);
            }
        }

        debug!("{peer} has {}/{} pieces", bitfield.count_ones(), self.total);
        state.bitfields.insert(peer, bitfield);
    }

    /// `peer` announced that it has one more piece.
    pub fn peer_have(&self, peer: PeerId, piece: usize) {
        if piece >= self.total {
            return;
        }
        if let Some(bitfield) = self.lock().bitfields.get_mut(&peer) {
            bitfield.safe_set(piece);
        }
    }

    /// Forget `peer`. The pieces it was downloading stay in the buffer for
    /// other peers to finish.
    pub fn remove_peer(&self, peer: PeerId) {
        let mut state = self.lock();
        state.bitfields.remove(&peer);
        state.affinity.remove(&peer);
        debug!("{peer} removed");
    }

    /// If peers should keep downloading.
    pub fn continue_download(&self) -> bool {
        !self.token.is_cancelled() && !self.is_download_complete()
    }

    pub fn is_download_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst) >= self.total
    }

    /// Our bitfield, the pieces that were verified.
    pub fn bitfield(&self) -> Bitfield {
        let state = self.lock();
        let mut bitfield = Bitfield::from_piece(self.total);

        for (i, p) in state.pieces.iter().enumerate() {
            if p.state == PieceState::Completed {
                bitfield.set(i, true);
            }
        }

        bitfield
    }

    pub fn piece_state(&self, piece: usize) -> Option<PieceState> {
        self.lock().pieces.get(piece).map(|p| p.state)
    }

    pub fn connected_peers(&self) -> usize {
        self.lock().bitfields.len()
    }

    /// Stop the download, every peer session and the disk will see
    /// [`PieceManager::continue_download`] return false.
    pub fn stop(&self) {
        info!("stopping the download");
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stats(&self) -> Stats {
        let state = self.lock();

        Stats {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total,
            peers: state.bitfields.len(),
            buffered: state.buffer.len(),
            downloaded: self.counter.downloaded(),
            download_rate: self.counter.rate(),
        }
    }

    /// Log the progress of the download every `interval`, until the download
    /// is stopped or complete.
    pub async fn report_progress(&self, interval: Duration) {
        let mut interval = tokio::time::interval(interval);

        while self.continue_download() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.token.cancelled() => break,
            }

            self.counter.update_rates().await;
            let stats = self.stats();

            info!(
                "{}/{} pieces ({:.1}%), {} downloaded, {}/s, {} peers",
                stats.completed,
                stats.total,
                percentage(stats.completed, stats.total),
                to_human_readable(stats.downloaded),
                to_human_readable(stats.download_rate),
                stats.peers,
            );
        }
    }
}
