//! Blocks, the unit of data actually exchanged with peers.
use bytes::Bytes;

/// The default block_len that most clients support, some clients drop
/// the connection on blocks larger than this value.
///
/// The last block of the last piece might be smaller.
pub const BLOCK_LEN: u32 = 16384;

/// A Block is a subset of a Piece,
/// pieces are subsets of the entire Torrent data.
///
/// When peers send data (seed) to us, they send us Blocks.
/// This happens on the "Piece" message of the peer wire protocol, the peer
/// session decodes it and hands it to [`crate::piece_manager::PieceManager`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    /// The index of the piece this block belongs to.
    pub index: usize,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's data. `block_len` most of the times,
    /// but the last block of the torrent *might* be smaller.
    pub block: Bytes,
}

impl Block {
    pub fn new(index: usize, begin: u32, block: impl Into<Bytes>) -> Self {
        Self { index, begin, block: block.into() }
    }
}

/// The representation of a [`Block`].
///
/// When we ask a peer to give us a [`Block`], we send this struct,
/// using the "Request" message of the tcp wire protocol.
///
/// This is almost identical to the [`Block`] struct,
/// the only difference is that instead of having a `block`,
/// we have a `len` representing the len of the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub index: usize,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's length in bytes.
    pub len: u32,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        BlockInfo {
            index: block.index,
            begin: block.begin,
            len: block.block.len() as u32,
        }
    }
}

impl BlockInfo {
    pub fn new(index: usize, begin: u32, len: u32) -> Self {
        Self { index, begin, len }
    }

    /// Position of this block inside its piece.
    #[inline]
    pub fn block_index(&self, block_len: u32) -> u32 {
        self.begin / block_len
    }
}
