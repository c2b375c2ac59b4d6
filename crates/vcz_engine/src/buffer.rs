//! A fixed amount of in-memory slots where pieces are assembled block by block
//! before they are verified.
//!
//! The buffer knows nothing about peers or hashes, only about which blocks of
//! which piece were requested and which ones arrived. Slots are reused, the
//! memory of a slot is only grown, never freed, while the buffer lives.
use hashbrown::HashMap;
use tracing::debug;

use crate::block::Block;

/// Download state of a single block of a buffered piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    Have,
    DontHave,
    Requested,
}

#[derive(Debug, Default)]
struct Slot {
    piece: usize,
    data: Vec<u8>,
    blocks: Vec<BlockState>,
    occupied: bool,
}

#[derive(Debug)]
pub struct Buffer {
    slots: Vec<Slot>,
    /// piece index -> slot index
    index: HashMap<usize, usize>,
    block_len: u32,
}

impl Buffer {
    /// Create a buffer of `capacity` slots, each one pre-allocated to hold a
    /// piece of `piece_length` bytes.
    pub fn new(capacity: usize, block_len: u32, piece_length: u32) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                data: Vec::with_capacity(piece_length as usize),
                blocks: Vec::with_capacity(
                    piece_length.div_ceil(block_len) as usize,
                ),
                ..Default::default()
            })
            .collect();

        Self { slots, index: HashMap::with_capacity(capacity), block_len }
    }

    /// Put `piece` in the first free slot, all of its blocks start as
    /// [`BlockState::DontHave`] and the data is zeroed.
    ///
    /// Returns false if the buffer is full.
    pub fn add_piece(
        &mut self,
        piece: usize,
        num_blocks: u32,
        piece_length: u32,
    ) -> bool {
        debug_assert!(!self.has_piece(piece), "piece {piece} already buffered");

        let Some((i, slot)) =
            self.slots.iter_mut().enumerate().find(|(_, s)| !s.occupied)
        else {
            return false;
        };

        slot.piece = piece;
        slot.occupied = true;
        slot.data.clear();
        slot.data.resize(piece_length as usize, 0);
        slot.blocks.clear();
        slot.blocks.resize(num_blocks as usize, BlockState::DontHave);

        self.index.insert(piece, i);
        debug!("piece {piece} added to slot {i}");
        true
    }

    pub fn has_piece(&self, piece: usize) -> bool {
        self.index.contains_key(&piece)
    }

    /// Mark the first block that is not downloaded nor requested as
    /// requested, and return its index.
    ///
    /// The boolean is true when, after this call, every block of the piece is
    /// either requested or downloaded.
    pub fn next_block_to_request(&mut self, piece: usize) -> (bool, Option<u32>) {
        let Some(slot) = self.slot_mut(piece) else { return (true, None) };

        let next = slot.blocks.iter().position(|b| *b == BlockState::DontHave);
        if let Some(i) = next {
            slot.blocks[i] = BlockState::Requested;
        }

        let all_requested =
            slot.blocks.iter().all(|b| *b != BlockState::DontHave);

        (all_requested, next.map(|i| i as u32))
    }

    /// If the block starting at `begin` still needs data. False for blocks
    /// that were already downloaded and for pieces not in the buffer.
    pub fn should_accept_block(&self, piece: usize, begin: u32) -> bool {
        let Some(&i) = self.index.get(&piece) else { return false };
        let block_index = (begin / self.block_len) as usize;

        matches!(
            self.slots[i].blocks.get(block_index),
            Some(BlockState::Requested | BlockState::DontHave)
        )
    }

    /// Copy the block into its piece and mark it as downloaded.
    ///
    /// Returns true if the piece is now complete, together with the bytes of
    /// the whole piece.
    pub fn write_block(&mut self, block: &Block) -> (bool, &[u8]) {
        let block_len = self.block_len;
        let Some(slot) = self.slot_mut(block.index) else {
            return (false, &[]);
        };

        let begin = block.begin as usize;
        let end = begin + block.block.len();
        let block_index = (block.begin / block_len) as usize;

        debug_assert!(end <= slot.data.len(), "block exceeds its piece");
        if end > slot.data.len() || block_index >= slot.blocks.len() {
            return (false, slot.data.as_slice());
        }

        slot.data[begin..end].copy_from_slice(&block.block);
        slot.blocks[block_index] = BlockState::Have;

        let completed = slot.blocks.iter().all(|b| *b == BlockState::Have);
        (completed, slot.data.as_slice())
    }

    /// Return every requested block of the piece to [`BlockState::DontHave`],
    /// so that they can be requested again.
    pub fn clear_requested(&mut self, piece: usize) {
        let Some(slot) = self.slot_mut(piece) else { return };

        for b in slot.blocks.iter_mut().filter(|b| **b == BlockState::Requested)
        {
            *b = BlockState::DontHave;
        }
    }

    /// Free the slot of `piece`.
    pub fn remove_piece(&mut self, piece: usize) {
        let i = self.index.remove(&piece);
        debug_assert!(i.is_some(), "piece {piece} is not buffered");

        if let Some(i) = i {
            self.slots[i].occupied = false;
            debug!("piece {piece} removed from slot {i}");
        }
    }

    /// The buffered pieces, in slot order.
    pub fn pieces_in_buffer(&self) -> Vec<usize> {
        self.slots.iter().filter(|s| s.occupied).map(|s| s.piece).collect()
    }

    pub fn is_full(&self) -> bool {
        self.index.len() == self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, piece: usize) -> Option<&mut Slot> {
        let i = self.index.get(&piece).copied();
        debug_assert!(i.is_some(), "piece {piece} is not buffered");
        self.slots.get_mut(i?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn block(index: usize, begin: u32, byte: u8, len: usize) -> Block {
        Block::new(index, begin, vec![byte; len])
    }

    #[test]
    fn starts_empty() {
        let buffer = Buffer::new(4, 5, 20);
        assert!(buffer.pieces_in_buffer().is_empty());
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut buffer = Buffer::new(3, 5, 20);
        let mut inside: Vec<usize> = Vec::new();

        for _ in 0..500 {
            let piece = rng.gen_range(0..10);
            if rng.gen_bool(0.6) {
                if inside.contains(&piece) {
                    continue;
                }
                let added = buffer.add_piece(piece, 4, 20);
                assert_eq!(added, inside.len() < 3);
                if added {
                    inside.push(piece);
                }
            } else if let Some(pos) = inside.iter().position(|p| *p == piece) {
                inside.remove(pos);
                buffer.remove_piece(piece);
            }

            let pieces = buffer.pieces_in_buffer();
            let unique: HashSet<usize> = pieces.iter().copied().collect();

            assert!(pieces.len() <= 3);
            assert_eq!(unique.len(), pieces.len());
            assert_eq!(buffer.is_full(), pieces.len() == 3);
            assert_eq!(unique, inside.iter().copied().collect::<HashSet<_>>());
        }
    }

    #[test]
    fn full_buffer_rejects_pieces() {
        let mut buffer = Buffer::new(2, 5, 20);
        assert!(buffer.add_piece(0, 4, 20));
        assert!(buffer.add_piece(1, 4, 20));
        assert!(buffer.is_full());
        assert!(!buffer.add_piece(2, 4, 20));
        assert!(!buffer.has_piece(2));

        buffer.remove_piece(0);
        assert!(buffer.add_piece(2, 4, 20));
        assert_eq!(buffer.pieces_in_buffer(), vec![2, 1]);
    }

    #[test]
    fn blocks_are_requested_in_order() {
        let mut buffer = Buffer::new(1, 5, 20);
        buffer.add_piece(0, 4, 20);

        assert_eq!(buffer.next_block_to_request(0), (false, Some(0)));
        assert_eq!(buffer.next_block_to_request(0), (false, Some(1)));
        assert_eq!(buffer.next_block_to_request(0), (false, Some(2)));
        assert_eq!(buffer.next_block_to_request(0), (true, Some(3)));
        assert_eq!(buffer.next_block_to_request(0), (true, None));
    }

    #[test]
    fn clear_requested_reopens_missing_blocks() {
        let mut buffer = Buffer::new(1, 5, 20);
        buffer.add_piece(0, 4, 20);

        for _ in 0..4 {
            buffer.next_block_to_request(0);
        }
        let (completed, _) = buffer.write_block(&block(0, 5, 1, 5));
        assert!(!completed);

        buffer.clear_requested(0);

        // block 1 is downloaded, the others are requested again
        assert_eq!(buffer.next_block_to_request(0), (false, Some(0)));
        assert_eq!(buffer.next_block_to_request(0), (false, Some(2)));
        assert_eq!(buffer.next_block_to_request(0), (true, Some(3)));
        assert_eq!(buffer.next_block_to_request(0), (true, None));
    }

    #[test]
    fn completes_only_with_every_block_in_any_order() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..20 {
            let mut buffer = Buffer::new(1, 5, 20);
            buffer.add_piece(3, 4, 20);

            let mut order: Vec<u32> = (0..4).collect();
            order.shuffle(&mut rng);

            for (n, b) in order.iter().enumerate() {
                let (completed, bytes) =
                    buffer.write_block(&block(3, b * 5, *b as u8, 5));
                assert_eq!(completed, n == 3);

                if completed {
                    let expected: Vec<u8> =
                        (0..4u8).flat_map(|i| [i; 5]).collect();
                    assert_eq!(bytes, expected.as_slice());
                }
            }
        }
    }

    #[test]
    fn should_accept_block() {
        let mut buffer = Buffer::new(1, 5, 20);
        assert!(!buffer.should_accept_block(0, 0));

        buffer.add_piece(0, 4, 20);
        // not requested yet, but still welcome
        assert!(buffer.should_accept_block(0, 0));

        buffer.next_block_to_request(0);
        assert!(buffer.should_accept_block(0, 0));

        buffer.write_block(&block(0, 0, 1, 5));
        assert!(!buffer.should_accept_block(0, 0));
        assert!(buffer.should_accept_block(0, 15));
        // out of the piece
        assert!(!buffer.should_accept_block(0, 20));
    }

    #[test]
    fn reused_slot_is_zeroed() {
        let mut buffer = Buffer::new(1, 5, 20);
        buffer.add_piece(0, 4, 20);
        buffer.write_block(&block(0, 0, 9, 5));
        buffer.remove_piece(0);

        // a shorter last piece reuses the slot
        buffer.add_piece(4, 3, 15);
        let (completed, bytes) = buffer.write_block(&block(4, 5, 1, 5));
        assert!(!completed);
        assert_eq!(bytes.len(), 15);
        assert_eq!(&bytes[..5], &[0; 5]);
        assert_eq!(&bytes[5..10], &[1; 5]);
    }
}
