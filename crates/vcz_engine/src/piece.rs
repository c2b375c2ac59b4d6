//! Per-piece bookkeeping of the engine.
use std::fmt::{Debug, Display};

/// Where a piece is in its lifecycle.
///
/// ```text
/// NotStarted --> Buffered <--> AllRequested
///     ^              |              |
///     +--- corrupted +--------------+--- verified --> Completed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PieceState {
    /// Not in the buffer, no block was requested yet.
    #[default]
    NotStarted,
    /// In the buffer with at least one block that can still be requested.
    Buffered,
    /// In the buffer and every block was requested or downloaded, new peers
    /// are not sent here until the piece is re-opened.
    AllRequested,
    /// Verified and handed to the disk. Terminal.
    Completed,
}

/// The SHA1 hash of a piece.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PieceHash(pub [u8; 20]);

impl PieceHash {
    /// Hash the bytes of a piece.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(bytes);
        Self(hasher.digest().bytes())
    }

    /// If `bytes` is the piece that this hash describes.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        Self::digest(bytes) == *self
    }
}

impl Display for PieceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for PieceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl From<[u8; 20]> for PieceHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PieceMetadata {
    /// The hash that the downloaded piece must have.
    pub hash: PieceHash,
    /// Length of the piece in bytes.
    pub length: u32,
    pub num_blocks: u32,
    pub state: PieceState,
}

impl PieceMetadata {
    pub fn new(hash: PieceHash, length: u32, block_len: u32) -> Self {
        Self {
            hash,
            length,
            num_blocks: length.div_ceil(block_len),
            state: PieceState::NotStarted,
        }
    }

    /// Length of the block at `block_index`, only the last block of a piece
    /// can be shorter than `block_len`.
    pub fn block_len(&self, block_index: u32, block_len: u32) -> u32 {
        block_len.min(self.length - block_index * block_len)
    }
}
